use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;

use chains::calendar::{Calendar, DayId, SystemCalendar};
use chains::config::Config;
use chains::stats::ChainStats;
use chains::store::catalog::{ChainCatalog, Filter, NewChain};
use chains::store::codec::{Chain, ChainKind, Color};
use chains::store::error::StoreError;
use chains::store::ledger::{LinkOutcome, UnlinkOutcome};
use chains::store::Store;

#[derive(Parser)]
#[command(name = "chains", about = "Habit chains. Don't break the chain.")]
struct Cli {
    /// Data directory (defaults to $CHAINS_DATA_DIR, then the config file)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Which chains positional indices refer to
    #[arg(short, long, global = true, value_enum)]
    filter: Option<FilterArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Active,
    Stopped,
}

impl From<FilterArg> for Filter {
    fn from(f: FilterArg) -> Self {
        match f {
            FilterArg::All => Filter::All,
            FilterArg::Active => Filter::Active,
            FilterArg::Stopped => Filter::Stopped,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start a new chain
    Add {
        name: String,
        /// Weekly chain needing this many days per week (daily if omitted)
        #[arg(long, value_name = "DAYS")]
        weekly: Option<u8>,
        #[arg(long)]
        color: Option<Color>,
    },
    /// List chains with their positions
    List {
        #[arg(long)]
        json: bool,
    },
    /// Mark chains done for a day
    Link {
        #[arg(required = true)]
        indices: Vec<usize>,
        /// Day to mark (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<DayId>,
        /// Tags to apply to the new links
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Remove marks for a day
    Unlink {
        #[arg(required = true)]
        indices: Vec<usize>,
        #[arg(long)]
        date: Option<DayId>,
    },
    /// Change a chain's name, color or cadence
    Edit {
        index: usize,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<Color>,
        #[arg(long, value_name = "DAYS", conflicts_with = "daily")]
        weekly: Option<u8>,
        #[arg(long)]
        daily: bool,
    },
    /// Add a tag to a chain
    Tag { index: usize, name: String },
    /// Remove a tag from a chain and from its links
    Untag { index: usize, name: String },
    /// Retire a chain, keeping its history
    Stop { index: usize },
    /// Reactivate a stopped chain (use with --filter stopped)
    Resume { index: usize },
    /// Delete a chain for good
    Delete { index: usize },
    /// Streaks, gaps and fulfillment
    Stats {
        /// Chain position (all visible chains if omitted)
        index: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Check the link file for inconsistencies
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chains=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load();
    let data_dir = config.data_dir(cli.dir.as_deref());
    debug!("data dir {}", data_dir.display());

    let store = Store::open(&data_dir, SystemCalendar)?;
    let mut chains = store.materialize_chains()?;
    chains.filter(cli.filter.map_or(config.default_filter, Filter::from));

    if !run(&store, &mut chains, cli.command)? {
        std::process::exit(1);
    }
    Ok(())
}

/// Print a user-input error; anything else is fatal.
fn report(err: StoreError) -> Result<bool> {
    if err.is_user_error() {
        eprintln!("error: {err}");
        Ok(false)
    } else {
        Err(err.into())
    }
}

/// Timestamp for `date`, or now.
fn when(store: &Store, date: Option<DayId>) -> i64 {
    match date {
        Some(day) => store.calendar().midnight(day),
        None => store.calendar().now_utc(),
    }
}

fn describe(chain: &Chain) -> String {
    let cadence = match chain.kind {
        ChainKind::Daily => "daily".to_string(),
        ChainKind::Weekly { min_days } => format!("{min_days}x/week"),
    };
    let mut line = format!("{} ({cadence}, {})", chain.name, chain.color);
    if !chain.tags.is_empty() {
        let tags: Vec<&str> = chain.tags.iter().map(|t| t.name.as_str()).collect();
        line.push_str(&format!(" [{}]", tags.join(", ")));
    }
    if chain.stopped.is_some() {
        line.push_str(" stopped");
    }
    line
}

fn run(store: &Store, chains: &mut ChainCatalog, command: Command) -> Result<bool> {
    let mut ok = true;

    match command {
        Command::Add {
            name,
            weekly,
            color,
        } => {
            let kind = match weekly {
                Some(days) => ChainKind::Weekly { min_days: days },
                None => ChainKind::Daily,
            };
            let new = NewChain {
                name,
                kind,
                color: color.unwrap_or_default(),
                created: store.calendar().now_utc(),
            };
            match chains.add(new) {
                Ok(id) => debug!("chain {id} created"),
                Err(e) => return report(e),
            }
            chains.persist()?;
        }

        Command::List { json } => {
            let links = store.materialize_links(0)?;
            let today = when(store, None);

            #[derive(Serialize)]
            struct Entry<'a> {
                position: usize,
                #[serde(flatten)]
                chain: &'a Chain,
                linked_today: bool,
            }

            let entries: Vec<Entry> = chains
                .visible()
                .map(|(position, chain)| Entry {
                    position,
                    chain,
                    linked_today: links.get(chain.id, today).is_some(),
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in &entries {
                    let mark = if e.linked_today { "x" } else { " " };
                    println!("{:>3} [{mark}] {}", e.position, describe(e.chain));
                }
            }
        }

        Command::Link {
            indices,
            date,
            tags,
        } => {
            let ts = when(store, date);
            let mut links = store.materialize_links(indices.len())?;
            for index in indices {
                let chain = match chains.at(index) {
                    Ok(c) => c,
                    Err(e) => {
                        ok &= report(e)?;
                        continue;
                    }
                };
                let bits = match chain.tag_bits(tags.as_slice()) {
                    Ok(bits) => bits,
                    Err(e) => {
                        eprintln!("error: {e}");
                        ok = false;
                        continue;
                    }
                };
                let outcome = match links.add(chain.id, ts, bits) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        ok &= report(e)?;
                        continue;
                    }
                };
                match outcome {
                    LinkOutcome::Added => println!("linked {}", chain.name),
                    LinkOutcome::AlreadyExists if bits != 0 => {
                        let existing = links.get(chain.id, ts).map_or(0, |l| l.tags);
                        links.set_tags(chain.id, ts, existing | bits);
                        println!("{} already linked, tags updated", chain.name);
                    }
                    LinkOutcome::AlreadyExists => {
                        println!("{} already linked, skipping", chain.name)
                    }
                }
            }
            links.persist()?;
        }

        Command::Unlink { indices, date } => {
            let ts = when(store, date);
            let mut links = store.materialize_links(0)?;
            for index in indices {
                let chain = match chains.at(index) {
                    Ok(c) => c,
                    Err(e) => {
                        ok &= report(e)?;
                        continue;
                    }
                };
                match links.remove(chain.id, ts) {
                    UnlinkOutcome::Removed => println!("unlinked {}", chain.name),
                    UnlinkOutcome::NotFound => {
                        let day = links.calendar().local_day(ts);
                        eprintln!("{} has no link on {day}", chain.name);
                        ok = false;
                    }
                }
            }
            links.persist()?;
        }

        Command::Edit {
            index,
            name,
            color,
            weekly,
            daily,
        } => {
            let mut edit = || -> Result<(), StoreError> {
                if let Some(name) = &name {
                    chains.rename(index, name)?;
                }
                if let Some(color) = color {
                    chains.set_color(index, color)?;
                }
                if let Some(days) = weekly {
                    chains.set_kind(index, ChainKind::Weekly { min_days: days })?;
                } else if daily {
                    chains.set_kind(index, ChainKind::Daily)?;
                }
                Ok(())
            };
            if let Err(e) = edit() {
                return report(e);
            }
            chains.persist()?;
        }

        Command::Tag { index, name } => {
            match chains.add_tag(index, &name) {
                Ok(tag) => debug!("tag {} = {}", tag.id, tag.name),
                Err(e) => return report(e),
            }
            chains.persist()?;
        }

        Command::Untag { index, name } => {
            let tag = match chains.remove_tag(index, &name) {
                Ok(tag) => tag,
                Err(e) => return report(e),
            };
            let id = chains.at(index)?.id;
            let mut links = store.materialize_links(0)?;
            let cleared = links.clear_tag(id, tag.bit());
            debug!("cleared tag {} from {cleared} links", tag.name);
            links.persist()?;
            chains.persist()?;
        }

        Command::Stop { index } => {
            if let Err(e) = chains.stop(index, store.calendar().now_utc()) {
                return report(e);
            }
            chains.persist()?;
        }

        Command::Resume { index } => {
            if let Err(e) = chains.resume(index) {
                return report(e);
            }
            chains.persist()?;
        }

        Command::Delete { index } => {
            match chains.delete(index) {
                Ok(chain) => println!("deleted {}", chain.name),
                Err(e) => return report(e),
            }
            chains.persist()?;
        }

        Command::Stats { index, json } => {
            let links = store.materialize_links(0)?;
            let view = links.view();

            #[derive(Serialize)]
            struct Entry<'a> {
                position: usize,
                name: &'a str,
                #[serde(flatten)]
                stats: ChainStats,
            }

            let selected: Vec<(usize, &Chain)> = match index {
                Some(i) => match chains.at(i) {
                    Ok(c) => vec![(i, c)],
                    Err(e) => return report(e),
                },
                None => chains.visible().collect(),
            };
            let entries: Vec<Entry> = selected
                .into_iter()
                .map(|(position, chain)| Entry {
                    position,
                    name: &chain.name,
                    stats: store.stats(chain, view.chain(chain.id)),
                })
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in &entries {
                    let s = &e.stats;
                    println!(
                        "{:>3} {}: streak {} (longest {}), longest gap {}, broken {}x, \
                         {:.1}% fulfilled",
                        e.position,
                        e.name,
                        s.current_streak,
                        s.longest_streak,
                        s.longest_gap,
                        s.times_broken,
                        s.fulfillment
                    );
                }
            }
        }

        Command::Verify => {
            let links = store.materialize_links(0)?;
            match links.verify() {
                Ok(()) => println!("{} links ok", links.len()),
                Err(violation) => {
                    eprintln!("inconsistent: {violation}");
                    ok = false;
                }
            }
            let orphans = links
                .links()
                .iter()
                .filter(|l| chains.get(l.chain_id).is_none())
                .count();
            if orphans > 0 {
                println!("{orphans} links belong to deleted chains");
            }
        }
    }

    Ok(ok)
}
