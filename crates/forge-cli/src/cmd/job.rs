use crate::cmd::open_engine;
use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum JobSubcommand {
    /// Switch a player to another job class (requires eligibility)
    Change {
        user: String,
        to: String,
        /// Idempotency key (default: a fresh job-change:<uuid>)
        #[arg(long)]
        key: Option<String>,
    },
    /// List configured job classes and their skill trees
    List,
}

pub fn run(root: &Path, subcmd: JobSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        JobSubcommand::Change { user, to, key } => {
            let result = engine.change_job(&user, &to, key)?;
            if json {
                return print_json(&result);
            }
            if result.accepted {
                println!("{user} is now a {to} (#{})", result.sequence);
            } else {
                println!("Job change already recorded as #{}", result.sequence);
            }
        }
        JobSubcommand::List => {
            let jobs = &engine.config().jobs;
            if json {
                return print_json(jobs);
            }
            for job in &jobs.classes {
                let marker = if job.slug == jobs.default { " (default)" } else { "" };
                println!("{}: {}{marker}", job.slug, job.title);
                for gate in &job.skills {
                    println!("  - {} from level {}", gate.skill, gate.min_level);
                }
            }
        }
    }
    Ok(())
}
