//! The balance card.

use ratatui::{
    Frame,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Paragraph},
};
use wallet_types::{BalanceView, Decimal, UserId};

/// Rows the inline viewport reserves for the card.
pub const CARD_HEIGHT: u16 = 5;
const CARD_WIDTH: u16 = 36;

const TEXT_PRIMARY: Color = Color::Rgb(220, 215, 186);
const TEXT_MUTED: Color = Color::Rgb(114, 113, 105);
const BORDER: Color = Color::Rgb(84, 84, 109);
const ACCENT: Color = Color::Rgb(127, 180, 202);

pub const LOADING: &str = "Loading...";
pub const UNKNOWN: &str = "—";

/// Two decimal places, currency after the amount.
#[must_use]
pub fn format_amount(amount: Decimal, currency: &str) -> String {
    format!("{amount:.2} {currency}")
}

#[must_use]
pub fn balance_text(view: BalanceView, currency: &str) -> String {
    match view {
        BalanceView::Loading => LOADING.to_string(),
        BalanceView::Value(amount) => format_amount(amount, currency),
        BalanceView::Unknown => UNKNOWN.to_string(),
    }
}

fn status_text(user: Option<&UserId>) -> String {
    match user {
        Some(user) => format!("{user} · q to quit"),
        None => "signed out · wallet login".to_string(),
    }
}

pub fn draw(frame: &mut Frame, view: BalanceView, currency: &str, user: Option<&UserId>) {
    let area = frame.area();
    let card = Rect {
        x: area.x,
        y: area.y,
        width: area.width.min(CARD_WIDTH),
        height: area.height.min(CARD_HEIGHT),
    };
    frame.render_widget(Clear, card);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(BORDER))
        .title(Span::styled(
            " Balance ",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ));

    let amount_style = match view {
        BalanceView::Value(_) => Style::default()
            .fg(TEXT_PRIMARY)
            .add_modifier(Modifier::BOLD),
        BalanceView::Loading | BalanceView::Unknown => Style::default().fg(TEXT_MUTED),
    };
    let lines = vec![
        Line::from(Span::styled(balance_text(view, currency), amount_style)),
        Line::from(""),
        Line::from(Span::styled(
            status_text(user),
            Style::default().fg(TEXT_MUTED),
        )),
    ];

    frame.render_widget(
        Paragraph::new(lines)
            .block(block)
            .alignment(Alignment::Center),
        card,
    );
}

#[cfg(test)]
mod tests {
    use super::{CARD_HEIGHT, balance_text, draw, format_amount};
    use ratatui::{Terminal, backend::TestBackend, buffer::Buffer};
    use wallet_types::{BalanceView, Decimal, UserId};

    fn rendered(buffer: &Buffer) -> String {
        let area = buffer.area;
        let mut out = String::new();
        for y in area.y..area.y + area.height {
            for x in area.x..area.x + area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn amounts_use_two_decimals() {
        assert_eq!(format_amount(Decimal::new(4250, 2), "€"), "42.50 €");
        assert_eq!(format_amount(Decimal::new(55, 0), "€"), "55.00 €");
        assert_eq!(format_amount(Decimal::new(12_346, 3), "$"), "12.35 $");
    }

    #[test]
    fn view_text() {
        assert_eq!(balance_text(BalanceView::Loading, "€"), "Loading...");
        assert_eq!(balance_text(BalanceView::Unknown, "€"), "—");
        assert_eq!(
            balance_text(BalanceView::Value(Decimal::new(5000, 2)), "€"),
            "50.00 €"
        );
    }

    #[test]
    fn card_shows_title_amount_and_user() {
        let mut terminal = Terminal::new(TestBackend::new(40, CARD_HEIGHT)).unwrap();
        let user = UserId::new("u1").unwrap();
        terminal
            .draw(|frame| {
                draw(
                    frame,
                    BalanceView::Value(Decimal::new(4250, 2)),
                    "€",
                    Some(&user),
                );
            })
            .unwrap();

        let screen = rendered(terminal.backend().buffer());
        assert!(screen.contains("Balance"), "{screen}");
        assert!(screen.contains("42.50 €"), "{screen}");
        assert!(screen.contains("u1"), "{screen}");
    }

    #[test]
    fn signed_out_card_shows_placeholder() {
        let mut terminal = Terminal::new(TestBackend::new(40, CARD_HEIGHT)).unwrap();
        terminal
            .draw(|frame| draw(frame, BalanceView::Unknown, "€", None))
            .unwrap();

        let screen = rendered(terminal.backend().buffer());
        assert!(screen.contains('—'), "{screen}");
        assert!(screen.contains("signed out"), "{screen}");
    }
}
