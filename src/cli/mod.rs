use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::application::{AccountLedger, AddFundsRequest, ConvertRequest, IssueCardRequest};
use crate::config::AppConfig;
use crate::domain::{CardId, Cents, User, format_cents};
use crate::notify::StoreNotifier;
use crate::rates::FixedRates;
use crate::storage::{LedgerStore, SqliteStore};

/// Cambio - prepaid wallet ledger
#[derive(Parser)]
#[command(name = "cambio")]
#[command(about = "A wallet ledger with prepaid top-ups, currency conversion and virtual cards")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to ./cambio.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Database file path, overriding the configuration
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Register a new user
    Register {
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Check a username and password
    Login {
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Show a user's balance
    Balance { username: String },

    /// Load funds from a prepaid code
    Topup {
        username: String,

        /// Amount to load (e.g., "500.00" or "500")
        amount: String,

        /// Prepaid code (10-20 letters, digits or '-')
        #[arg(long)]
        code: String,
    },

    /// Quote and record a conversion out of the wallet currency
    Convert {
        username: String,

        /// Amount in the source currency
        amount: String,

        /// Target currency code (e.g., "USD")
        #[arg(long)]
        to: String,

        /// Source currency (defaults to the wallet currency)
        #[arg(long)]
        from: Option<String>,
    },

    /// Virtual card commands
    #[command(subcommand)]
    Card(CardCommands),

    /// List a user's transactions, newest first
    Transactions {
        username: String,

        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a user's notifications
    Notifications {
        username: String,

        /// Mark every notification as read afterwards
        #[arg(long)]
        mark_read: bool,
    },

    /// Reconcile a user's balance against the transaction log
    Check { username: String },

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, cards, account
        export_type: String,

        username: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CardCommands {
    /// Issue a virtual card loaded from the balance
    Issue {
        username: String,

        /// Amount to load onto the card
        amount: String,

        /// Card currency (defaults to the wallet currency)
        #[arg(long)]
        currency: Option<String>,
    },

    /// List active cards
    List { username: String },

    /// Deactivate a card
    Deactivate { username: String, card_id: CardId },
}

impl Cli {
    /// Resolve configuration: file and environment first, then CLI flags.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config =
            AppConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(database) = &self.database {
            config.database.path = database.clone();
        }
        Ok(config)
    }

    pub async fn run(self, config: AppConfig) -> Result<()> {
        match self.command {
            Commands::Init => {
                let store =
                    SqliteStore::init(&config.database.path, &config.sqlite_options()).await?;
                store.close().await;
                println!("Database initialized: {}", config.database.path);
            }
            command => {
                let ledger = open_ledger(&config).await?;
                let result = run_ledger_command(&ledger, command).await;
                // Notifications are delivered in the background; let them land before exit.
                ledger.flush_notifications().await;
                result?;
            }
        }
        Ok(())
    }
}

async fn run_ledger_command(ledger: &AccountLedger, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {}

        Commands::Register { username, password } => {
            let user = ledger.register_user(&username, &password).await?;
            println!(
                "Registered user: {} (id {}, {})",
                user.username, user.id, user.currency
            );
        }

        Commands::Login { username, password } => {
            let user = ledger.authenticate(&username, &password).await?;
            println!("Authenticated as {} (id {})", user.username, user.id);
        }

        Commands::Balance { username } => {
            let user = ledger.find_user(&username).await?;
            let user = ledger.balance(user.id).await?;
            println!(
                "{}: {} {}",
                user.username,
                format_cents(user.balance),
                user.currency
            );
        }

        Commands::Topup {
            username,
            amount,
            code,
        } => {
            let user = ledger.find_user(&username).await?;
            let result = ledger
                .add_funds(user.id, AddFundsRequest::new(code, amount))
                .await?;
            println!(
                "Loaded {} {} ({})",
                format_cents(result.transaction.amount),
                result.transaction.currency,
                result.transaction.description
            );
            println!(
                "New balance: {} {}",
                format_cents(result.user.balance),
                result.user.currency
            );
        }

        Commands::Convert {
            username,
            amount,
            to,
            from,
        } => {
            let user = ledger.find_user(&username).await?;
            let from = from.unwrap_or_else(|| user.currency.clone());
            let result = ledger
                .convert(user.id, ConvertRequest::new(amount, from, to))
                .await?;
            println!("{}", result.transaction.description);
            println!(
                "Converted amount: {} {}",
                format_cents(result.converted_amount),
                result.to_currency
            );
        }

        Commands::Card(card_cmd) => {
            run_card_command(ledger, card_cmd).await?;
        }

        Commands::Transactions { username, limit } => {
            run_transactions_command(ledger, &username, limit).await?;
        }

        Commands::Notifications {
            username,
            mark_read,
        } => {
            run_notifications_command(ledger, &username, mark_read).await?;
        }

        Commands::Check { username } => {
            run_check_command(ledger, &username).await?;
        }

        Commands::Export {
            export_type,
            username,
            output,
        } => {
            run_export_command(ledger, &export_type, &username, output.as_deref()).await?;
        }
    }

    Ok(())
}

/// Build the ledger from configuration over an already initialized database.
async fn open_ledger(config: &AppConfig) -> Result<AccountLedger> {
    let settings = config.ledger_settings()?;
    let cards = config.card_generator()?;

    let store = SqliteStore::init(&config.database.path, &config.sqlite_options())
        .await
        .with_context(|| format!("Failed to open database: {}", config.database.path))?;
    let store: Arc<dyn LedgerStore> = Arc::new(store);

    let rates = match config.rate_provider() {
        Ok(rates) => rates,
        Err(err) => {
            // Everything except conversion works without a rate source.
            warn!(error = %format!("{:#}", err), "rate source unavailable");
            Arc::new(FixedRates::new())
        }
    };

    Ok(AccountLedger::new(store.clone(), rates)
        .with_notifier(Arc::new(StoreNotifier::new(store)))
        .with_card_generator(Arc::new(cards))
        .with_settings(settings))
}

async fn run_card_command(ledger: &AccountLedger, cmd: CardCommands) -> Result<()> {
    match cmd {
        CardCommands::Issue {
            username,
            amount,
            currency,
        } => {
            let user = ledger.find_user(&username).await?;
            let currency = currency.unwrap_or_else(|| user.currency.clone());
            let issuance = ledger
                .issue_card(user.id, IssueCardRequest::new(amount, currency))
                .await?;
            let card = &issuance.card;
            println!("Issued virtual card {}", card.id);
            println!("  Number: {}", card.card_number);
            println!("  Expiry: {}", card.expiry_date);
            println!("  CVV:    {}", card.cvv);
            println!("  Amount: {} {}", format_cents(card.amount), card.currency);
            println!(
                "New balance: {} {}",
                format_cents(issuance.user.balance),
                issuance.user.currency
            );
        }
        CardCommands::List { username } => {
            let user = ledger.find_user(&username).await?;
            let cards = ledger.list_active_cards(user.id).await?;
            if cards.is_empty() {
                println!("No active cards.");
            } else {
                println!(
                    "{:<6} {:<20} {:<7} {:>12} {:<8}",
                    "ID", "NUMBER", "EXPIRY", "AMOUNT", "CURRENCY"
                );
                println!("{}", "-".repeat(57));
                for card in cards {
                    println!(
                        "{:<6} {:<20} {:<7} {:>12} {:<8}",
                        card.id,
                        format!("**** {}", card.last4()),
                        card.expiry_date,
                        format_cents(card.amount),
                        card.currency
                    );
                }
            }
        }
        CardCommands::Deactivate { username, card_id } => {
            let user = ledger.find_user(&username).await?;
            let card = ledger.deactivate_card(user.id, card_id).await?;
            println!("Deactivated card {} (**** {})", card.id, card.last4());
        }
    }
    Ok(())
}

async fn run_transactions_command(
    ledger: &AccountLedger,
    username: &str,
    limit: Option<usize>,
) -> Result<()> {
    let user = ledger.find_user(username).await?;
    let transactions = ledger.list_transactions(user.id).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<12} {:<14} {:>12} {:<4} DESCRIPTION",
        "ID", "DATE", "TYPE", "AMOUNT", "CUR"
    );
    println!("{}", "-".repeat(80));
    for tx in transactions.iter().take(limit.unwrap_or(usize::MAX)) {
        println!(
            "{:<6} {:<12} {:<14} {:>12} {:<4} {}",
            tx.id,
            tx.created_at.format("%Y-%m-%d"),
            tx.kind.as_str(),
            format_cents(tx.amount),
            tx.currency,
            truncate(&tx.description, 40)
        );
    }
    Ok(())
}

async fn run_notifications_command(
    ledger: &AccountLedger,
    username: &str,
    mark_read: bool,
) -> Result<()> {
    let user = ledger.find_user(username).await?;
    let notifications = ledger.notifications(user.id).await?;

    if notifications.is_empty() {
        println!("No notifications.");
    } else {
        for notification in &notifications {
            println!(
                "{} {} [{}] {}: {}",
                if notification.is_read { " " } else { "*" },
                notification.created_at.format("%Y-%m-%d %H:%M"),
                notification.kind.as_str(),
                notification.title,
                notification.message
            );
        }
    }

    if mark_read {
        let marked = ledger.mark_notifications_read(user.id).await?;
        println!("Marked {} notification(s) as read", marked);
    }
    Ok(())
}

async fn run_check_command(ledger: &AccountLedger, username: &str) -> Result<()> {
    let user = ledger.find_user(username).await?;
    println!("Checking ledger for {}...\n", user.username);

    let report = ledger.reconcile(user.id).await?;
    print_report_line(&user, "Top-ups:", report.credits);
    print_report_line(&user, "Card loads:", report.debits);
    println!("  {}", "-".repeat(30));
    print_report_line(&user, "Expected:", report.expected_balance);
    println!(
        "  {:<12} {:>12} {}  {}",
        "Balance:",
        format_cents(report.balance),
        user.currency,
        if report.balance == report.expected_balance {
            "OK"
        } else {
            "MISMATCH!"
        }
    );
    println!("  Transactions: {}", report.transaction_count);
    println!();

    if report.is_consistent() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger reconciliation failed");
    }

    Ok(())
}

fn print_report_line(user: &User, label: &str, cents: Cents) {
    println!(
        "  {:<12} {:>12} {}",
        label,
        format_cents(cents),
        user.currency
    );
}

/// What `cambio export` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportKind {
    Transactions,
    Cards,
    Account,
}

impl FromStr for ExportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transactions" => Ok(ExportKind::Transactions),
            "cards" => Ok(ExportKind::Cards),
            "account" => Ok(ExportKind::Account),
            _ => anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, cards, account",
                s
            ),
        }
    }
}

async fn run_export_command(
    ledger: &AccountLedger,
    export_type: &str,
    username: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    // Reject bad arguments before an output file is created.
    let kind: ExportKind = export_type.parse()?;
    let user = ledger.find_user(username).await?;
    let exporter = Exporter::new(ledger);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match kind {
        ExportKind::Transactions => {
            let count = exporter.export_transactions_csv(user.id, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        ExportKind::Cards => {
            let count = exporter.export_cards_csv(user.id, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} cards", count);
            }
        }
        ExportKind::Account => {
            let snapshot = exporter.export_account_json(user.id, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported account {}: {} transactions, {} cards",
                    snapshot.user.username,
                    snapshot.transactions.len(),
                    snapshot.cards.len()
                );
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
