//! UI rendering for the TUI.

use annote_core::capture::CaptureState;
use annote_core::events::Edge;
use annote_core::frames::{format_ms, format_ms_precise};
use annote_core::playback::MediaStatus;
use annote_core::Rgb;
use ratatui::{
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{
        Block, BorderType, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row,
        Table,
    },
    Frame,
};

use crate::app::{App, Mode};

// ========== Palette ==========

/// Border for the stream panel
const BORDER_STREAMS: Color = Color::Rgb(0, 150, 150);
/// Border for the category list
const BORDER_CATEGORIES: Color = Color::Rgb(180, 100, 180);
/// Border for the timeline
const BORDER_TIMELINE: Color = Color::Rgb(80, 160, 80);
/// Timeline and scrub bar track
const TRACK_COLOR: Color = Color::Rgb(60, 60, 60);
/// Playhead marker
const PLAYHEAD_COLOR: Color = Color::Rgb(250, 250, 250);
/// Handles of the block being edited
const HANDLE_COLOR: Color = Color::Rgb(255, 215, 0);
/// Role markers (time/audio source)
const ROLE_COLOR: Color = Color::Rgb(100, 180, 180);
/// Dimmed text
const DIM_COLOR: Color = Color::Rgb(128, 128, 128);

/// Lanes shown before the timeline stops growing.
const MAX_VISIBLE_LANES: u16 = 8;

fn rgb(color: Rgb) -> Color {
    Color::Rgb(color.r, color.g, color.b)
}

/// Main render function.
pub fn render(frame: &mut Frame, app: &mut App) {
    let area = frame.area();

    let lanes = (app.session.timeline().lane_count() as u16).clamp(1, MAX_VISIBLE_LANES);
    let streams = app.session.engine().stream_ids().len() as u16;

    // Layout: header, scrub bar, body, step label, status, footer
    let chunks = Layout::vertical([
        Constraint::Length(2), // Header
        Constraint::Length(1), // Scrub bar
        Constraint::Min(8),    // Body
        Constraint::Length(1), // Step label
        Constraint::Length(1), // Status / warnings
        Constraint::Length(1), // Footer
    ])
    .split(area);

    let body = Layout::horizontal([Constraint::Length(36), Constraint::Min(20)]).split(chunks[2]);
    let left = Layout::vertical([
        Constraint::Length(streams.max(1) + 2),
        Constraint::Min(3),
    ])
    .split(body[0]);
    let right = Layout::vertical([Constraint::Length(lanes + 2), Constraint::Min(4)]).split(body[1]);

    render_header(frame, app, chunks[0]);
    render_scrub_bar(frame, app, chunks[1]);
    render_streams(frame, app, left[0]);
    render_categories(frame, app, left[1]);
    render_timeline(frame, app, right[0]);
    render_records(frame, app, right[1]);
    render_step_label(frame, app, chunks[3]);
    render_status(frame, app, chunks[4]);
    render_footer(frame, app, chunks[5]);

    if let Mode::Assess { confidence, notes } = &app.mode {
        render_assess_popup(frame, app, *confidence, notes, area);
    }
}

/// Render the header with session, position and play state.
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let engine = app.session.engine();

    let (state, state_color) = if engine.is_play_pending() {
        ("… waiting", Color::Yellow)
    } else if engine.is_playing() {
        ("▶ playing", Color::Green)
    } else if engine.is_at_end() {
        ("■ at end", DIM_COLOR)
    } else {
        ("⏸ paused", Color::White)
    };

    let line = Line::from(vec![
        Span::styled(" annote", Style::default().fg(Color::Cyan).bold()),
        Span::styled(" │ ", Style::default().fg(TRACK_COLOR)),
        Span::raw(app.session.label().to_string()),
        Span::styled(" │ ", Style::default().fg(TRACK_COLOR)),
        Span::styled(state, Style::default().fg(state_color)),
        Span::raw("  "),
        Span::styled(
            format_ms_precise(engine.position_ms()),
            Style::default().fg(Color::White).bold(),
        ),
        Span::styled(
            format!(" / {}", format_ms(engine.duration_ms())),
            Style::default().fg(DIM_COLOR),
        ),
        Span::styled(" │ ", Style::default().fg(TRACK_COLOR)),
        Span::styled("time ", Style::default().fg(ROLE_COLOR)),
        Span::raw(engine.time_source().unwrap_or("-").to_string()),
        Span::styled("  audio ", Style::default().fg(ROLE_COLOR)),
        Span::raw(engine.audio_source().unwrap_or("-").to_string()),
    ]);

    let header = Paragraph::new(line).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, area);
}

/// Render the scrub bar and remember its area for mouse hits.
fn render_scrub_bar(frame: &mut Frame, app: &mut App, area: Rect) {
    app.scrub_area = area;
    if area.width == 0 {
        return;
    }

    let engine = app.session.engine();
    let position = engine.position_ms();
    let duration = engine.duration_ms();
    let width = i32::from(area.width);
    let geometry = *app.session.timeline().geometry();
    let playhead = geometry.ms_to_x(position, duration, width);
    let overlay = app.session.capture().pending_overlay(position).map(|o| {
        (
            geometry.ms_to_x(o.start_ms, duration, width),
            geometry.ms_to_x(o.end_ms, duration, width),
            rgb(o.color),
        )
    });

    let spans: Vec<Span> = (0..width)
        .map(|x| {
            if x == playhead {
                return Span::styled("●", Style::default().fg(PLAYHEAD_COLOR));
            }
            let color = match overlay {
                Some((start, end, color)) if x >= start && x <= end => color,
                _ if x < playhead => Color::Cyan,
                _ => TRACK_COLOR,
            };
            Span::styled("━", Style::default().fg(color))
        })
        .collect();

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Render the stream panel with role markers and status.
fn render_streams(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .session
        .engine()
        .snapshots()
        .into_iter()
        .map(|s| {
            let status_color = match s.status {
                MediaStatus::Ready => Color::Green,
                MediaStatus::Loading | MediaStatus::Buffering => Color::Yellow,
                MediaStatus::Invalid | MediaStatus::Stalled => Color::Red,
                _ => DIM_COLOR,
            };
            let mut spans = vec![
                Span::styled(
                    if s.active { "● " } else { "○ " },
                    Style::default().fg(if s.active { Color::Cyan } else { DIM_COLOR }),
                ),
                Span::raw(format!("{:<9}", s.stream_id)),
                Span::styled(
                    if s.is_time_source { "T" } else { " " },
                    Style::default().fg(ROLE_COLOR).bold(),
                ),
                Span::styled(
                    if s.is_audio_source { "A " } else { "  " },
                    Style::default().fg(ROLE_COLOR).bold(),
                ),
                Span::styled(
                    format!("{:<8}", s.status.as_str()),
                    Style::default().fg(status_color),
                ),
            ];
            if s.exhausted {
                spans.push(Span::styled("ended", Style::default().fg(DIM_COLOR).italic()));
            } else {
                spans.push(Span::raw(format_ms(s.position_ms)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(BORDER_STREAMS))
                .title(" Streams "),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default().with_selected(Some(app.stream_cursor));
    frame.render_stateful_widget(list, area, &mut state);
}

/// Render the category list with color swatches.
fn render_categories(frame: &mut Frame, app: &mut App, area: Rect) {
    let selected = app.session.capture().selected().map(|c| c.number);
    let items: Vec<ListItem> = app
        .session
        .categories()
        .iter()
        .map(|category| {
            let color = rgb(app.session.category_color(category.number));
            let mut spans = vec![
                Span::styled("██ ", Style::default().fg(color)),
                Span::raw(format!("{}: {}", category.number, category.name)),
            ];
            if selected == Some(category.number) {
                spans.push(Span::styled(" ◀", Style::default().fg(Color::Yellow)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let title = if items.is_empty() {
        " Categories (none configured) "
    } else {
        " Categories "
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(Style::default().fg(BORDER_CATEGORIES))
                .title(title),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▶ ");

    frame.render_stateful_widget(list, area, &mut app.category_state);
}

/// Render lanes of record blocks with the playhead and edit handles.
fn render_timeline(frame: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(BORDER_TIMELINE))
        .title(" Timeline ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    app.timeline_area = inner;
    app.session.set_timeline_width(i32::from(inner.width));
    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let width = usize::from(inner.width);
    let rows = usize::from(inner.height);
    let track = ('·', Style::default().fg(TRACK_COLOR));
    let mut grid = vec![vec![track; width]; rows];

    let timeline = app.session.timeline();
    let records = app.session.records();
    let geometry = *timeline.geometry();
    let editing = timeline.editing_index();
    let selected = timeline.selected();

    for b in timeline.blocks() {
        let Some(row) = usize::try_from(b.rect.y).ok().filter(|r| *r < rows) else {
            continue;
        };
        let color = records
            .get(b.index)
            .map(|r| rgb(app.session.category_color(r.category_id)))
            .unwrap_or(DIM_COLOR);
        let glyph = if selected == Some(b.index) { '▓' } else { '█' };
        for cell in &mut grid[row][cell_range(b.rect.x, b.rect.right(), width)] {
            *cell = (glyph, Style::default().fg(color));
        }

        if editing == Some(b.index) {
            let (left, right) = geometry.handle_rects(b.rect);
            for (edge, handle) in [(Edge::Left, left), (Edge::Right, right)] {
                let mut style = Style::default().fg(HANDLE_COLOR).bg(color);
                if edge == app.active_edge {
                    style = style.add_modifier(Modifier::BOLD);
                }
                for cell in &mut grid[row][cell_range(handle.x, handle.right(), width)] {
                    *cell = ('┃', style);
                }
            }
        }
    }

    let engine = app.session.engine();
    let playhead = geometry.ms_to_x(engine.position_ms(), engine.duration_ms(), i32::from(inner.width));
    if let Ok(x) = usize::try_from(playhead) {
        for row in grid.iter_mut() {
            if let Some(cell) = row.get_mut(x) {
                *cell = if cell.0 == track.0 {
                    ('│', Style::default().fg(PLAYHEAD_COLOR))
                } else {
                    (cell.0, cell.1.add_modifier(Modifier::REVERSED))
                };
            }
        }
    }

    let lines: Vec<Line> = grid
        .into_iter()
        .map(|row| {
            Line::from(
                row.into_iter()
                    .map(|(c, style)| Span::styled(c.to_string(), style))
                    .collect::<Vec<_>>(),
            )
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

/// Columns `x..right` clipped to a row of `width` cells.
fn cell_range(x: i32, right: i32, width: usize) -> std::ops::Range<usize> {
    let clip = |v: i32| (v.max(0) as usize).min(width);
    let start = clip(x);
    start..clip(right).max(start)
}

/// Render the record table.
fn render_records(frame: &mut Frame, app: &mut App, area: Rect) {
    let header_cells = ["#", "Step", "Start", "End", "Dur", "Frames", "Views", "Conf", "Notes"]
        .into_iter()
        .map(|h| Cell::from(h).style(Style::default().fg(Color::Yellow).bold()));
    let header = Row::new(header_cells).height(1);

    let timeline = app.session.timeline();
    let live = timeline.editing_index().zip(timeline.edit_bounds());

    let rows: Vec<Row> = app
        .session
        .records()
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let color = rgb(app.session.category_color(rec.category_id));
            let step = Cell::from(Line::from(vec![
                Span::styled("█ ", Style::default().fg(color)),
                Span::raw(format!("{} {}", rec.category_id, rec.category_name)),
            ]));

            // show the live bounds of the block being edited
            let (start, end, time_style) = match live {
                Some((index, (start, end))) if index == i => {
                    (start, end, Style::default().fg(HANDLE_COLOR))
                }
                _ => (rec.start_ms(), rec.end_ms(), Style::default()),
            };

            Row::new([
                Cell::from((i + 1).to_string()).style(Style::default().fg(DIM_COLOR)),
                step,
                Cell::from(format_ms_precise(start)).style(time_style),
                Cell::from(format_ms_precise(end)).style(time_style),
                Cell::from(format!("{:.1}s", rec.total_time_s)),
                Cell::from(format!("{}-{}", rec.start_frame, rec.end_frame))
                    .style(Style::default().fg(DIM_COLOR)),
                Cell::from(rec.camid()),
                Cell::from(rec.confidence.to_string()),
                Cell::from(rec.notes.replace('\n', " ⏎ ")),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(3),  // #
        Constraint::Length(18), // Step
        Constraint::Length(9),  // Start
        Constraint::Length(9),  // End
        Constraint::Length(7),  // Dur
        Constraint::Length(11), // Frames
        Constraint::Length(16), // Views
        Constraint::Length(4),  // Conf
        Constraint::Fill(1),    // Notes
    ];

    let title = format!(" Records ({}) ", app.session.records().len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title(title),
        )
        .row_highlight_style(
            Style::default()
                .add_modifier(Modifier::REVERSED)
                .fg(Color::Cyan),
        )
        .highlight_symbol("▶ ");

    frame.render_stateful_widget(table, area, &mut app.record_state);
}

/// Render the capture workflow hint.
fn render_step_label(frame: &mut Frame, app: &App, area: Rect) {
    let capture = app.session.capture();
    let color = match capture.state() {
        CaptureState::Idle => DIM_COLOR,
        CaptureState::CategorySelected => Color::White,
        CaptureState::AwaitingStart | CaptureState::AwaitingEnd => Color::Yellow,
        CaptureState::AwaitingConfirmEnd => Color::Green,
    };
    let line = Line::from(vec![
        Span::styled(
            format!(" [{}] ", capture.state().as_str()),
            Style::default().fg(color),
        ),
        Span::raw(capture.step_label()),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

/// Render the latest status message, or the latest warning.
fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(status) = &app.status {
        let color = if status.is_error { Color::Red } else { Color::Green };
        Line::from(Span::styled(
            format!(" {}", status.text),
            Style::default().fg(color),
        ))
    } else if let Some(warning) = app.warnings.last() {
        Line::from(vec![
            Span::styled(" ⚠ ", Style::default().fg(Color::Yellow)),
            Span::styled(warning.clone(), Style::default().fg(Color::Yellow)),
        ])
    } else {
        Line::default()
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn key_hint(key: &'static str, desc: &'static str) -> [Span<'static>; 2] {
    [
        Span::styled(key, Style::default().fg(Color::Yellow)),
        Span::raw(desc),
    ]
}

/// Render the footer with the keys that apply right now.
fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let hints: &[(&'static str, &'static str)] = if app.session.timeline().is_editing() {
        &[
            (" ←/→", " nudge  "),
            ("Shift", " fast  "),
            ("Tab", " edge  "),
            ("Enter", " save  "),
            ("Esc", " cancel  "),
        ]
    } else if app.session.capture().is_capturing() {
        &[
            (" space", " play  "),
            ("←/→", " seek  "),
            ("c", " confirm start  "),
            ("e", " end  "),
            ("f", " finish  "),
            ("x", " cancel  "),
        ]
    } else {
        &[
            (" space", " play  "),
            ("←/→", " seek  "),
            ("r", " restart  "),
            ("↑/↓", " category  "),
            ("s", " start  "),
            ("j/k", " record  "),
            ("E", " edit  "),
            ("d", " delete  "),
            ("t/a", " sources  "),
            ("[/]", " stream  "),
            ("v", " view  "),
            ("q", " quit  "),
        ]
    };

    let footer_spans: Vec<Span> = hints
        .iter()
        .flat_map(|(key, desc)| key_hint(*key, *desc))
        .collect();
    frame.render_widget(Paragraph::new(Line::from(footer_spans)), area);
}

/// Render the confidence/notes prompt shown while finishing a step.
fn render_assess_popup(frame: &mut Frame, app: &App, confidence: u8, notes: &str, area: Rect) {
    let popup = centered_rect(56, 8, area);

    let step = app
        .session
        .capture()
        .pending()
        .map(|p| p.category.to_string())
        .unwrap_or_default();

    let lines = vec![
        Line::from(vec![
            Span::styled("Step        ", Style::default().fg(ROLE_COLOR)),
            Span::raw(step),
        ]),
        Line::from(vec![
            Span::styled("Confidence  ", Style::default().fg(ROLE_COLOR)),
            Span::styled(
                format!("◀ {confidence:>2} ▶"),
                Style::default().fg(Color::White).bold(),
            ),
            Span::styled("  (1-10)", Style::default().fg(DIM_COLOR)),
        ]),
        Line::from(vec![
            Span::styled("Notes       ", Style::default().fg(ROLE_COLOR)),
            Span::raw(notes.to_string()),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
        ]),
        Line::default(),
        Line::from(
            [
                key_hint("↑/↓", " confidence  "),
                key_hint("Enter", " save  "),
                key_hint("Esc", " back"),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>(),
        ),
    ];

    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(HANDLE_COLOR))
            .title(" Finish step "),
    );
    frame.render_widget(Clear, popup);
    frame.render_widget(widget, popup);
}

/// A `width` x `height` rect centered in `area`.
fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [cell] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(row);
    cell
}
