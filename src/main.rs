use std::{env, process, sync::Arc, thread, time::Instant};

use rand::Rng;
use rust_decimal::Decimal;

use ledger_engine::{Ledger, LedgerConfig};

/// Simulation driver: spawns one worker thread per transaction against a
/// shared ledger and reports the aggregate totals once all workers join.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = env::args().skip(1);
    let usage = "usage: ledger_engine <accounts> <workers>";
    let (Some(accounts_arg), Some(workers_arg)) = (args.next(), args.next()) else {
        eprintln!("{usage}");
        process::exit(2);
    };
    let num_accounts: usize = accounts_arg.parse()?;
    let num_workers: usize = workers_arg.parse()?;
    if num_accounts == 0 || num_workers == 0 {
        eprintln!("{usage}: both counts must be positive");
        process::exit(2);
    }

    let started = Instant::now();
    let ledger = Arc::new(Ledger::new(LedgerConfig::from_env()?));

    let mut rng = rand::thread_rng();
    for _ in 0..num_accounts {
        ledger.add_account(Decimal::from(rng.gen_range(10_000..=50_000)));
    }
    let ids = ledger.account_ids();
    tracing::info!(accounts = ids.len(), workers = num_workers, "simulation starting");

    let mut workers = Vec::with_capacity(num_workers);
    for worker in 0..num_workers {
        // The driver picks the scenario; the worker only executes it.
        let kind = rng.gen_range(0..3);
        let amount = Decimal::from(rng.gen_range(1_000..=10_000));
        let account = ids[worker % ids.len()];
        let receiver = ids[(worker + 1) % ids.len()];

        let ledger = Arc::clone(&ledger);
        workers.push(thread::spawn(move || {
            let outcome = match kind {
                0 => ledger.deposit(account, amount),
                1 => ledger.withdraw(account, amount),
                _ => ledger.transfer(account, receiver, amount),
            };
            if let Err(e) = outcome {
                tracing::warn!(worker, "transaction rejected: {e}");
            }
        }));
    }

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    println!("total deposited: {}", ledger.total_deposited());
    println!("total withdrawn: {}", ledger.total_withdrawn());
    println!("elapsed: {:?}", started.elapsed());

    Ok(())
}
