use anyhow::Result;
use coop_records::entities::loan::{get_schedule, list_loans};
use coop_records::entities::member::list_members;
use coop_records::entities::savings::list_accounts;
use coop_records::ledger::all_transactions;
use coop_records::money::format_amount;
use coop_records::{
    AccountStatus, Installment, LedgerTransaction, Loan, LoanStatus, Member, MemberStatus,
    SavingsAccount, TxType,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io;

const PAGE_STEP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Members,
    Savings,
    Loans,
    Ledger,
}

impl Page {
    pub const ALL: [Page; 4] = [Page::Members, Page::Savings, Page::Loans, Page::Ledger];

    pub fn next(&self) -> Self {
        match self {
            Page::Members => Page::Savings,
            Page::Savings => Page::Loans,
            Page::Loans => Page::Ledger,
            Page::Ledger => Page::Members,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Members => Page::Ledger,
            Page::Savings => Page::Members,
            Page::Loans => Page::Savings,
            Page::Ledger => Page::Loans,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Members => "Members",
            Page::Savings => "Savings",
            Page::Loans => "Loans",
            Page::Ledger => "Ledger",
        }
    }

    fn index(&self) -> usize {
        match self {
            Page::Members => 0,
            Page::Savings => 1,
            Page::Loans => 2,
            Page::Ledger => 3,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct PortfolioStats {
    pub active_members: usize,
    pub total_savings: Decimal,
    pub dormant_accounts: usize,
    pub pending_loans: usize,
    pub released_loans: usize,
    pub outstanding_principal: Decimal,
}

pub struct App {
    pub members: Vec<Member>,
    pub accounts: Vec<SavingsAccount>,
    pub loans: Vec<Loan>,
    pub transactions: Vec<LedgerTransaction>,
    pub schedules: HashMap<i64, Vec<Installment>>,
    pub current_page: Page,
    pub states: [TableState; 4],
    pub show_detail: bool,
    /// Members: Active only; Savings: Active only; Loans: still open
    pub active_only: bool,
    /// Ledger page transaction type filter
    pub tx_filter: Option<TxType>,
}

impl App {
    pub fn new(
        members: Vec<Member>,
        accounts: Vec<SavingsAccount>,
        loans: Vec<Loan>,
        transactions: Vec<LedgerTransaction>,
        schedules: HashMap<i64, Vec<Installment>>,
    ) -> Self {
        let mut app = Self {
            members,
            accounts,
            loans,
            transactions,
            schedules,
            current_page: Page::Members,
            states: Default::default(),
            show_detail: false,
            active_only: false,
            tx_filter: None,
        };
        app.reset_selections();
        app
    }

    /// Snapshot everything the screens show
    pub fn load(conn: &Connection) -> Result<Self> {
        let loans = list_loans(conn)?;
        let mut schedules = HashMap::new();
        for loan in &loans {
            schedules.insert(loan.id, get_schedule(conn, loan.id)?);
        }

        Ok(Self::new(
            list_members(conn)?,
            list_accounts(conn)?,
            loans,
            all_transactions(conn)?,
            schedules,
        ))
    }

    fn reset_selections(&mut self) {
        for page in Page::ALL {
            let len = self.len_of(page);
            self.states[page.index()].select(if len == 0 { None } else { Some(0) });
        }
    }

    pub fn visible_members(&self) -> Vec<&Member> {
        self.members
            .iter()
            .filter(|m| !self.active_only || m.status == MemberStatus::Active)
            .collect()
    }

    pub fn visible_accounts(&self) -> Vec<&SavingsAccount> {
        self.accounts
            .iter()
            .filter(|a| !self.active_only || a.status == AccountStatus::Active)
            .collect()
    }

    pub fn visible_loans(&self) -> Vec<&Loan> {
        self.loans
            .iter()
            .filter(|l| !self.active_only || l.status.is_open())
            .collect()
    }

    pub fn visible_transactions(&self) -> Vec<&LedgerTransaction> {
        self.transactions
            .iter()
            .filter(|t| self.tx_filter.map_or(true, |f| t.tx_type == f))
            .collect()
    }

    fn len_of(&self, page: Page) -> usize {
        match page {
            Page::Members => self.visible_members().len(),
            Page::Savings => self.visible_accounts().len(),
            Page::Loans => self.visible_loans().len(),
            Page::Ledger => self.visible_transactions().len(),
        }
    }

    pub fn visible_len(&self) -> usize {
        self.len_of(self.current_page)
    }

    pub fn state(&mut self) -> &mut TableState {
        &mut self.states[self.current_page.index()]
    }

    pub fn selected(&self) -> Option<usize> {
        self.states[self.current_page.index()].selected()
    }

    pub fn selected_member(&self) -> Option<&Member> {
        self.states[Page::Members.index()]
            .selected()
            .and_then(|i| self.visible_members().get(i).copied())
    }

    pub fn selected_loan(&self) -> Option<&Loan> {
        self.states[Page::Loans.index()]
            .selected()
            .and_then(|i| self.visible_loans().get(i).copied())
    }

    pub fn member_name(&self, member_id: i64) -> String {
        self.members
            .iter()
            .find(|m| m.id == member_id)
            .map(|m| m.display_name())
            .unwrap_or_else(|| format!("#{}", member_id))
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn toggle_active_only(&mut self) {
        self.active_only = !self.active_only;
        self.reset_selections();
    }

    pub fn apply_tx_filter(&mut self, filter: Option<TxType>) {
        self.tx_filter = filter;
        self.reset_selections();
    }

    pub fn clear_filters(&mut self) {
        self.active_only = false;
        self.tx_filter = None;
        self.reset_selections();
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let i = match self.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        self.state().select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let i = match self.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state().select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let i = self.selected().map_or(0, |i| (i + PAGE_STEP).min(len - 1));
        self.state().select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.visible_len() == 0 {
            return;
        }
        let i = self.selected().map_or(0, |i| i.saturating_sub(PAGE_STEP));
        self.state().select(Some(i));
    }

    pub fn home(&mut self) {
        if self.visible_len() > 0 {
            self.state().select(Some(0));
        }
    }

    pub fn end(&mut self) {
        let len = self.visible_len();
        if len > 0 {
            self.state().select(Some(len - 1));
        }
    }

    pub fn stats(&self) -> PortfolioStats {
        let mut stats = PortfolioStats {
            active_members: self.members.iter().filter(|m| m.status == MemberStatus::Active).count(),
            ..Default::default()
        };

        for account in &self.accounts {
            match account.status {
                AccountStatus::Active => stats.total_savings += account.balance,
                AccountStatus::Dormant => {
                    stats.dormant_accounts += 1;
                    stats.total_savings += account.balance;
                }
                AccountStatus::Closed => {}
            }
        }

        for loan in &self.loans {
            match loan.status {
                LoanStatus::Pending | LoanStatus::Approved => stats.pending_loans += 1,
                LoanStatus::Released => {
                    stats.released_loans += 1;
                    stats.outstanding_principal += loan.outstanding_principal;
                }
                LoanStatus::Paid | LoanStatus::Rejected => {}
            }
        }

        stats
    }
}

pub fn run_ui(conn: &Connection, app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, conn, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    conn: &Connection,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::Char('a') => app.toggle_active_only(),
                KeyCode::Char('c') => app.clear_filters(),
                KeyCode::Char('r') => {
                    let page = app.current_page;
                    *app = App::load(conn)?;
                    app.current_page = page;
                }
                KeyCode::Char('1') if app.current_page == Page::Ledger => app.apply_tx_filter(None),
                KeyCode::Char('2') if app.current_page == Page::Ledger => {
                    app.apply_tx_filter(Some(TxType::Deposit))
                }
                KeyCode::Char('3') if app.current_page == Page::Ledger => {
                    app.apply_tx_filter(Some(TxType::Withdrawal))
                }
                KeyCode::Char('4') if app.current_page == Page::Ledger => {
                    app.apply_tx_filter(Some(TxType::Interest))
                }
                KeyCode::Char('5') if app.current_page == Page::Ledger => {
                    app.apply_tx_filter(Some(TxType::LoanPayment))
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.home(),
                KeyCode::End => app.end(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let detail_page = matches!(app.current_page, Page::Members | Page::Loans);
    let content = if app.show_detail && detail_page {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(chunks[1]);
        match app.current_page {
            Page::Members => render_member_detail(f, content_chunks[1], app),
            _ => render_loan_detail(f, content_chunks[1], app),
        }
        content_chunks[0]
    } else {
        chunks[1]
    };

    match app.current_page {
        Page::Members => render_members(f, content, app),
        Page::Savings => render_accounts(f, content, app),
        Page::Loans => render_loans(f, content, app),
        Page::Ledger => render_ledger(f, content, app),
    }

    render_status_bar(f, chunks[2], app);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    Row::new(cells).style(Style::default().bg(Color::DarkGray)).height(1)
}

fn table_block(title: String) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(title)
}

fn highlight() -> Style {
    Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let stats = app.stats();

    let mut tab_spans = vec![];
    for (i, page) in Page::ALL.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }
        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Members: {}", stats.active_members),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Savings: {}", format_amount(stats.total_savings)),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Loans out: {}", format_amount(stats.outstanding_principal)),
        Style::default().fg(Color::Red),
    ));
    if stats.pending_loans > 0 {
        tab_spans.push(Span::raw("  "));
        tab_spans.push(Span::styled(
            format!("Pending: {}", stats.pending_loans),
            Style::default().fg(Color::Yellow),
        ));
    }

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_members(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_members()
        .into_iter()
        .map(|m| {
            let color = match m.status {
                MemberStatus::Active => Color::Green,
                MemberStatus::Inactive => Color::Yellow,
                MemberStatus::Withdrawn => Color::DarkGray,
            };
            Row::new(vec![
                Cell::from(m.member_code.clone()),
                Cell::from(truncate(&m.display_name(), 30)),
                Cell::from(m.join_date.to_string()),
                Cell::from(truncate(&m.contact_number, 16)),
                Cell::from(m.status.to_string()).style(Style::default().fg(color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Length(32),
            Constraint::Length(12),
            Constraint::Length(18),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Code", "Name", "Joined", "Contact", "Status"]))
    .block(table_block(format!(" Members{} ", if app.active_only { " (active)" } else { "" })))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, app.state());
}

fn render_accounts(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_accounts()
        .into_iter()
        .map(|a| {
            let color = match a.status {
                AccountStatus::Active => Color::Green,
                AccountStatus::Dormant => Color::Yellow,
                AccountStatus::Closed => Color::DarkGray,
            };
            Row::new(vec![
                Cell::from(a.account_number.clone()),
                Cell::from(truncate(&app.member_name(a.member_id), 28)),
                Cell::from(format_amount(a.balance)),
                Cell::from(a.last_activity.to_string()),
                Cell::from(a.status.to_string()).style(Style::default().fg(color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(11),
            Constraint::Length(30),
            Constraint::Length(16),
            Constraint::Length(12),
            Constraint::Length(9),
        ],
    )
    .header(header_row(&["Account", "Member", "Balance", "Last Activity", "Status"]))
    .block(table_block(" Savings Accounts ".to_string()))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, app.state());
}

fn loan_color(status: LoanStatus) -> Color {
    match status {
        LoanStatus::Pending => Color::Yellow,
        LoanStatus::Approved => Color::Cyan,
        LoanStatus::Released => Color::Red,
        LoanStatus::Paid => Color::Green,
        LoanStatus::Rejected => Color::DarkGray,
    }
}

fn render_loans(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_loans()
        .into_iter()
        .map(|l| {
            Row::new(vec![
                Cell::from(l.loan_number.clone()),
                Cell::from(truncate(&app.member_name(l.member_id), 24)),
                Cell::from(format_amount(l.principal)),
                Cell::from(format!("{} mo", l.term_months)),
                Cell::from(l.interest_method.to_string()),
                Cell::from(format_amount(l.outstanding_principal)),
                Cell::from(l.status.to_string()).style(Style::default().fg(loan_color(l.status))),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(11),
            Constraint::Length(26),
            Constraint::Length(14),
            Constraint::Length(7),
            Constraint::Length(12),
            Constraint::Length(14),
            Constraint::Length(9),
        ],
    )
    .header(header_row(&["Loan", "Member", "Principal", "Term", "Method", "Outstanding", "Status"]))
    .block(table_block(format!(" Loans{} ", if app.active_only { " (open)" } else { "" })))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, app.state());
}

fn render_ledger(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .visible_transactions()
        .into_iter()
        .map(|t| {
            let color = match t.tx_type {
                TxType::Deposit | TxType::Interest => Color::Green,
                TxType::Withdrawal | TxType::LoanRelease => Color::Red,
                TxType::LoanPayment => Color::Cyan,
            };
            Row::new(vec![
                Cell::from(t.tx_date.to_string()),
                Cell::from(t.tx_type.to_string()).style(Style::default().fg(color)),
                Cell::from(truncate(&app.member_name(t.member_id), 24)),
                Cell::from(format_amount(t.amount)).style(Style::default().fg(color)),
                Cell::from(format_amount(t.balance_after)),
                Cell::from(truncate(&t.reference, 14)),
                Cell::from(t.actor.clone()),
            ])
        })
        .collect();

    let title = match app.tx_filter {
        Some(filter) => format!(" Ledger - {} ", filter),
        None => " Ledger ".to_string(),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(14),
            Constraint::Length(26),
            Constraint::Length(14),
            Constraint::Length(14),
            Constraint::Length(16),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["Date", "Type", "Member", "Amount", "Balance", "Reference", "By"]))
    .block(table_block(title))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, app.state());
}

fn label(text: &str) -> Span<'static> {
    Span::styled(
        format!("  {}: ", text),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn section(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("  {}", text),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
    ))
}

fn render_member_detail(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Member Details ");

    let member = match app.selected_member() {
        Some(m) => m,
        None => {
            f.render_widget(Paragraph::new("No member selected").block(block), area);
            return;
        }
    };

    let mut content = vec![
        Line::from(""),
        Line::from(vec![label("Code"), Span::raw(member.member_code.clone())]),
        Line::from(vec![label("Name"), Span::raw(member.display_name())]),
        Line::from(vec![label("Address"), Span::raw(member.address.clone())]),
        Line::from(vec![label("Contact"), Span::raw(member.contact_number.clone())]),
        Line::from(vec![
            label("Email"),
            Span::raw(member.email.clone().unwrap_or_else(|| "-".to_string())),
        ]),
        Line::from(vec![label("Joined"), Span::raw(member.join_date.to_string())]),
        Line::from(""),
        section("SAVINGS"),
    ];

    for account in app.accounts.iter().filter(|a| a.member_id == member.id) {
        content.push(Line::from(format!(
            "  {}  {:>14}  {}",
            account.account_number,
            format_amount(account.balance),
            account.status
        )));
    }

    content.push(Line::from(""));
    content.push(section("LOANS"));
    for loan in app.loans.iter().filter(|l| l.member_id == member.id) {
        content.push(Line::from(vec![
            Span::raw(format!(
                "  {}  {:>14}  ",
                loan.loan_number,
                format_amount(loan.outstanding_principal)
            )),
            Span::styled(loan.status.to_string(), Style::default().fg(loan_color(loan.status))),
        ]));
    }

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_loan_detail(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Amortization Schedule ");

    let loan = match app.selected_loan() {
        Some(l) => l,
        None => {
            f.render_widget(Paragraph::new("No loan selected").block(block), area);
            return;
        }
    };

    let mut content = vec![
        Line::from(vec![label("Loan"), Span::raw(loan.loan_number.clone())]),
        Line::from(vec![
            label("Rate"),
            Span::raw(format!("{}% p.a. {}", loan.annual_rate * Decimal::ONE_HUNDRED, loan.interest_method)),
        ]),
        Line::from(vec![
            label("Deductions"),
            Span::raw(format!(
                "RLPF {}  SC {}  Net {}",
                format_amount(loan.rlpf),
                format_amount(loan.service_charge),
                format_amount(loan.net_proceeds)
            )),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "   #  Due          Principal     Interest       Due       Paid",
            Style::default().fg(Color::Yellow),
        )),
    ];

    for item in app.schedules.get(&loan.id).into_iter().flatten() {
        let style = if item.is_settled() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        content.push(Line::from(Span::styled(
            format!(
                "  {:>2}  {}  {:>11}  {:>11}  {:>9}  {:>9}",
                item.installment,
                item.due_date,
                format_amount(item.principal),
                format_amount(item.interest),
                format_amount(item.amount_due),
                format_amount(item.principal_paid + item.interest_paid),
            ),
            style,
        )));
    }

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.selected().map(|i| i + 1).unwrap_or(0);
    let total = app.visible_len();

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, total),
        Style::default().fg(Color::Cyan),
    )];

    if app.active_only || app.tx_filter.is_some() {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled("Filtered", Style::default().fg(Color::Green)));
        status_spans.push(Span::raw(" ("));
        status_spans.push(Span::styled("c", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" clear)"));
    }

    let keys: &[(&str, &str)] = match app.current_page {
        Page::Ledger => &[("1-5", " Type"), ("Tab", " Page"), ("r", " Reload")],
        _ => &[("Enter", " Details"), ("a", " Active"), ("Tab", " Page"), ("r", " Reload")],
    };
    for (key, what) in keys {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(key.to_string(), Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(what.to_string()));
    }
    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use coop_records::amortization::InterestMethod;
    use coop_records::ledger::AccountKind;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn member(id: i64, status: MemberStatus) -> Member {
        Member {
            id,
            member_code: format!("M-{:06}", id),
            first_name: "Juan".to_string(),
            middle_name: None,
            last_name: format!("Member{}", id),
            birth_date: None,
            address: "Cebu City".to_string(),
            contact_number: "0917".to_string(),
            email: None,
            join_date: date(2020, 1, 1),
            status,
        }
    }

    fn account(id: i64, member_id: i64, balance: Decimal, status: AccountStatus) -> SavingsAccount {
        SavingsAccount {
            id,
            account_number: format!("SA-{:06}", id),
            member_id,
            balance,
            status,
            opened_on: date(2020, 1, 1),
            last_activity: date(2024, 1, 1),
            closed_on: None,
        }
    }

    fn loan(id: i64, status: LoanStatus, outstanding: Decimal) -> Loan {
        Loan {
            id,
            loan_number: format!("LN-{:06}", id),
            member_id: 1,
            principal: dec!(10000),
            annual_rate: dec!(0.12),
            term_months: 12,
            interest_method: InterestMethod::Flat,
            rlpf: dec!(100),
            service_charge: dec!(200),
            net_proceeds: dec!(9700),
            outstanding_principal: outstanding,
            status,
            purpose: "Capital".to_string(),
            applied_on: date(2024, 1, 1),
            approved_by: None,
            released_on: None,
        }
    }

    fn tx(id: i64, tx_type: TxType) -> LedgerTransaction {
        LedgerTransaction {
            id,
            tx_uuid: String::new(),
            account_kind: AccountKind::Savings,
            account_id: 1,
            member_id: 1,
            tx_type,
            amount: dec!(100),
            balance_after: dec!(100),
            tx_date: date(2024, 1, 1),
            reference: "OR".to_string(),
            actor: "teller".to_string(),
        }
    }

    fn app() -> App {
        App::new(
            vec![
                member(1, MemberStatus::Active),
                member(2, MemberStatus::Inactive),
                member(3, MemberStatus::Active),
            ],
            vec![
                account(1, 1, dec!(1500), AccountStatus::Active),
                account(2, 2, dec!(250), AccountStatus::Dormant),
                account(3, 3, Decimal::ZERO, AccountStatus::Closed),
            ],
            vec![
                loan(1, LoanStatus::Released, dec!(8000)),
                loan(2, LoanStatus::Pending, Decimal::ZERO),
                loan(3, LoanStatus::Paid, Decimal::ZERO),
            ],
            vec![tx(1, TxType::Deposit), tx(2, TxType::Withdrawal), tx(3, TxType::Deposit)],
            HashMap::new(),
        )
    }

    #[test]
    fn test_page_cycle() {
        let mut app = app();
        assert_eq!(app.current_page, Page::Members);

        app.next_page();
        app.next_page();
        app.next_page();
        assert_eq!(app.current_page, Page::Ledger);
        app.next_page();
        assert_eq!(app.current_page, Page::Members);
        app.previous_page();
        assert_eq!(app.current_page, Page::Ledger);
    }

    #[test]
    fn test_navigation_wraps_and_pages_keep_own_selection() {
        let mut app = app();
        assert_eq!(app.selected(), Some(0));

        app.previous();
        assert_eq!(app.selected(), Some(2));
        app.next();
        assert_eq!(app.selected(), Some(0));
        app.next();
        assert_eq!(app.selected_member().unwrap().id, 2);

        app.next_page();
        assert_eq!(app.selected(), Some(0));
        app.end();
        assert_eq!(app.selected(), Some(2));
        app.page_up();
        assert_eq!(app.selected(), Some(0));
        app.page_down();
        assert_eq!(app.selected(), Some(2));

        app.previous_page();
        assert_eq!(app.selected(), Some(1));
    }

    #[test]
    fn test_active_only_filter() {
        let mut app = app();
        app.toggle_active_only();

        assert_eq!(app.visible_members().len(), 2);
        assert_eq!(app.visible_accounts().len(), 1);
        assert_eq!(app.visible_loans().len(), 2);
        assert_eq!(app.visible_transactions().len(), 3);

        app.clear_filters();
        assert_eq!(app.visible_members().len(), 3);
    }

    #[test]
    fn test_tx_filter_resets_selection() {
        let mut app = app();
        app.current_page = Page::Ledger;
        app.end();
        assert_eq!(app.selected(), Some(2));

        app.apply_tx_filter(Some(TxType::Withdrawal));
        assert_eq!(app.visible_len(), 1);
        assert_eq!(app.selected(), Some(0));

        app.apply_tx_filter(Some(TxType::Interest));
        assert_eq!(app.selected(), None);
        app.next();
        assert_eq!(app.selected(), None);
    }

    #[test]
    fn test_stats() {
        let stats = app().stats();

        assert_eq!(stats.active_members, 2);
        assert_eq!(stats.total_savings, dec!(1750));
        assert_eq!(stats.dormant_accounts, 1);
        assert_eq!(stats.pending_loans, 1);
        assert_eq!(stats.released_loans, 1);
        assert_eq!(stats.outstanding_principal, dec!(8000));
    }

    #[test]
    fn test_member_name_and_truncate() {
        let app = app();
        assert_eq!(app.member_name(99), "#99");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("abc", 6), "abc");
    }
}
