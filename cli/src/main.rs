//! MLM Commission CLI - operator interface to the commission engine
//!
//! Each invocation loads the engine from a JSON checkpoint, runs one command
//! and saves the checkpoint back. Cron drives the sweeps and flushes:
//!
//! ```text
//! mlm-commission init --root ROOT
//! mlm-commission approve ALICE 1000000 --referral ROOT
//! mlm-commission sweep rewards
//! mlm-commission flush --date 2024-02-15
//! mlm-commission show tree
//! ```

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use mlm_commission_core::models::{
    MemberId, RewardGrant, RoyaltyMembership, ScheduleKind, TriggerEvent,
};
use mlm_commission_core::scheduler::{BatchReport, JobKind, SweepResult};
use mlm_commission_core::store::TreeStore;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod lease;
mod output;
mod state;

use state::StateFile;

/// MLM commission engine CLI
#[derive(Parser)]
#[command(name = "mlm-commission")]
#[command(about = "Referral tree commission engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration (TOML); defaults apply when omitted
    #[arg(short, long, env = "MLM_CONFIG")]
    config: Option<String>,

    /// Checkpoint file holding tree, commission tables and wallets
    #[arg(short, long, env = "MLM_STATE", default_value = "commission-state.json")]
    state: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new checkpoint with the tree root
    Init {
        /// Root member id
        #[arg(long)]
        root: String,

        /// Overwrite an existing checkpoint
        #[arg(long)]
        force: bool,
    },

    /// Open a zero-balance wallet
    OpenWallet { member: String },

    /// Register an approved investment and distribute direct and level income
    Approve {
        member: String,

        /// Amount in cents
        amount: i64,

        /// Referral source (stamped on the member's node at placement)
        #[arg(long)]
        referral: Option<String>,

        #[arg(long, default_value = "basic")]
        investment_type: String,

        #[arg(long)]
        guaranteed_type: Option<String>,

        /// Open the member's wallet first if it does not exist
        #[arg(long)]
        open_wallet: bool,
    },

    /// Mark interest as handled for a level-paid trigger
    InterestSent { trigger: Uuid },

    /// Run a batch sweep
    Sweep {
        #[arg(value_enum)]
        job: SweepJob,
    },

    /// Pay scheduled commissions due on a date
    Flush {
        /// Due date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Only flush one schedule source
        #[arg(long, value_enum)]
        source: Option<FlushSource>,
    },

    /// Print engine state as JSON
    Show {
        #[arg(value_enum)]
        what: ShowTarget,
    },

    /// Show the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SweepJob {
    Direct,
    Level,
    Rewards,
    Royalty,
    Working,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlushSource {
    DirectMonthly,
    RewardInstallment,
}

impl From<FlushSource> for ScheduleKind {
    fn from(source: FlushSource) -> Self {
        match source {
            FlushSource::DirectMonthly => ScheduleKind::DirectMonthly,
            FlushSource::RewardInstallment => ScheduleKind::RewardInstallment,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShowTarget {
    Tree,
    Schedules,
    Records,
    Wallets,
    Triggers,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let file = StateFile::new(&cli.state, cli.config.as_deref())?;

    // Read-only commands never take the checkpoint lease
    match cli.command {
        Commands::Show { what } => return show(&file, what),
        Commands::Config => return output::print_toml(file.config()),
        _ => {}
    }

    let Some(lease) = file.lock()? else {
        return report_lock_held(&cli.command, &cli.state);
    };

    match cli.command {
        Commands::Init { root, force } => {
            let engine = file.create(MemberId::new(root), force, &lease)?;
            output::print_success(&format!(
                "Initialized {} with {} node(s)",
                cli.state,
                engine.checkpoint()?.store.nodes.len()
            ));
            Ok(())
        }

        Commands::OpenWallet { member } => {
            let engine = file.load(&lease)?;
            engine.ledger().open_wallet(&MemberId::new(member.clone()))?;
            file.save(&engine, &lease)?;
            output::print_success(&format!("Opened wallet for {}", member));
            Ok(())
        }

        Commands::Approve {
            member,
            amount,
            referral,
            investment_type,
            guaranteed_type,
            open_wallet,
        } => {
            let engine = file.load(&lease)?;
            let member = MemberId::new(member);
            if open_wallet && engine.ledger().balance(&member)?.is_none() {
                engine.ledger().open_wallet(&member)?;
            }

            let mut trigger = TriggerEvent::new(member, amount, investment_type, engine.clock().now())?;
            if let Some(referral) = referral {
                trigger = trigger.with_referral(MemberId::new(referral));
            }
            if let Some(guaranteed_type) = guaranteed_type {
                trigger = trigger.with_guaranteed_type(guaranteed_type);
            }
            let id = engine.submit_trigger(trigger)?;
            let outcome = engine.on_investment_approved(id);
            // The trigger is persisted even when distribution failed, so a sweep can retry it
            file.save(&engine, &lease)?;
            output::print_json(&outcome?)
        }

        Commands::InterestSent { trigger } => {
            let engine = file.load(&lease)?;
            engine.mark_interest_sent(trigger)?;
            file.save(&engine, &lease)?;
            output::print_success(&format!("Trigger {} complete", trigger));
            Ok(())
        }

        Commands::Sweep { job } => {
            let engine = file.load(&lease)?;
            info!(job = ?job, "Running sweep");
            let result = match job {
                SweepJob::Direct => serde_json::to_value(engine.run_direct_income_sweep()?),
                SweepJob::Level => serde_json::to_value(engine.run_level_income_sweep()?),
                SweepJob::Rewards => serde_json::to_value(engine.run_lifetime_reward_sweep()?),
                SweepJob::Royalty => serde_json::to_value(engine.run_royalty_sweep()?),
                SweepJob::Working => serde_json::to_value(engine.run_working_ids_sweep()?),
            }?;
            file.save(&engine, &lease)?;
            output::print_json(&result)
        }

        Commands::Flush { date, source } => {
            let engine = file.load(&lease)?;
            let as_of = date.unwrap_or_else(|| engine.clock().today());
            let reports = match source {
                Some(source) => vec![engine.run_scheduled_payment_flush(as_of, source.into())?],
                None => engine.run_all_scheduled_flushes(as_of)?,
            };
            file.save(&engine, &lease)?;
            output::print_json(&reports)
        }

        Commands::Show { .. } | Commands::Config => Ok(()),
    }
}

fn show(file: &StateFile, what: ShowTarget) -> Result<()> {
    let engine = file.read()?;
    let snapshot = engine.checkpoint()?;
    match what {
        ShowTarget::Tree => output::print_json(
            &engine
                .store()
                .nodes_breadth_first(file.config().traversal_step_limit)?,
        ),
        ShowTarget::Schedules => output::print_json(&snapshot.store.schedules),
        ShowTarget::Records => output::print_json(&snapshot.store.records),
        ShowTarget::Wallets => output::print_json(&snapshot.ledger.wallets),
        ShowTarget::Triggers => output::print_json(&snapshot.store.triggers),
    }
}

/// Another run owns the checkpoint: batch jobs report a lock skip, anything
/// else is an error
fn report_lock_held(command: &Commands, state: &str) -> Result<()> {
    warn!(state, "Checkpoint held by another run");
    match command {
        Commands::Sweep { job } => {
            let report = match job {
                SweepJob::Direct => serde_json::to_value(BatchReport::lock_held(JobKind::DirectIncome)),
                SweepJob::Level => serde_json::to_value(BatchReport::lock_held(JobKind::LevelIncome)),
                SweepJob::Rewards => serde_json::to_value(SweepResult::<RewardGrant>::lock_held(
                    JobKind::LifetimeReward,
                )),
                SweepJob::Royalty => serde_json::to_value(SweepResult::<RoyaltyMembership>::lock_held(
                    JobKind::Royalty,
                )),
                SweepJob::Working => {
                    serde_json::to_value(SweepResult::<MemberId>::lock_held(JobKind::WorkingIds))
                }
            }?;
            output::print_json(&report)
        }
        Commands::Flush { source, .. } => {
            let kinds = match source {
                Some(source) => vec![ScheduleKind::from(*source)],
                None => ScheduleKind::ALL.to_vec(),
            };
            let reports: Vec<BatchReport> = kinds
                .into_iter()
                .map(|kind| BatchReport::lock_held(JobKind::ScheduledFlush(kind)))
                .collect();
            output::print_json(&reports)
        }
        _ => bail!("Checkpoint {} is in use by another run; try again later", state),
    }
}
