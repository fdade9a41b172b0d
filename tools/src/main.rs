//! fee-runner: headless driver for the FeeBook fee engine.
//!
//! Usage:
//!   fee-runner --seed 12345 --payments 500 --plan data/sample_plan.json --db fees.db
//!   fee-runner --db fees.db --ipc-mode

use anyhow::{Context, Result};
use feebook_core::{
    config::FeeConfig,
    engine::FeeEngine,
    plan::{FeeMode, FeePlanView},
    regression::CurvePoint,
    store::FeeStore,
    types::{PaymentId, UserId},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde_json::{json, Value};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetPlan {
        user_id: UserId,
    },
    PutPlan {
        user_id: UserId,
        plan:    FeePlanView,
    },
    ValidateFormula {
        formula_text: String,
    },
    FitInterval {
        #[serde(default)]
        points:  Vec<CurvePoint>,
        max_fee: f64,
    },
    ComputeFee {
        user_id: UserId,
        amount:  f64,
    },
    RecordPayment {
        user_id:     UserId,
        amount:      f64,
        #[serde(default)]
        description: Option<String>,
    },
    UpdatePayment {
        payment_id: PaymentId,
        amount:     f64,
    },
    DeletePayment {
        payment_id: PaymentId,
    },
    ListPayments {
        user_id: UserId,
    },
    ListFeeRecords {
        user_id: UserId,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let payments = parse_arg(&args, "--payments", 200usize);
    let user_id = parse_arg(&args, "--user", 1 as UserId);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let plan_path = string_arg(&args, "--plan");

    let config = match string_arg(&args, "--config") {
        Some(path) => FeeConfig::load(path)?,
        None => FeeConfig::default(),
    };

    let store = if db == ":memory:" {
        FeeStore::in_memory()?
    } else {
        FeeStore::open(db)?
    };
    store.migrate()?;
    let engine = FeeEngine::new(store, config);

    if ipc_mode {
        return run_ipc_loop(&engine);
    }

    println!("FeeBook fee-runner");
    println!("  seed:      {seed}");
    println!("  payments:  {payments}");
    println!("  user:      {user_id}");
    println!("  db:        {db}");
    println!();

    let plan: FeePlanView = match plan_path {
        Some(path) => {
            let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
            serde_json::from_str(&content).with_context(|| format!("Invalid plan in {path}"))?
        }
        None => default_plan(&engine),
    };

    run_batch(&engine, user_id, seed, payments, plan)
}

/// Seed a raw history, install the plan, then push a second batch through the ledger.
fn run_batch(engine: &FeeEngine, user_id: UserId, seed: u64, payments: usize, plan: FeePlanView) -> Result<()> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);

    for _ in 0..payments {
        let amount = random_amount(&mut rng);
        engine.store().insert_payment(user_id, amount, Some("history"))?;
    }
    log::info!("user={user_id} runner: seeded {payments} historical payments");

    let saved = engine.put_fee_plan(user_id, plan)?;
    log::info!("user={user_id} runner: installed {} plan", saved.mode.as_str());

    let mut charged = 0usize;
    let mut total_fees = 0.0;
    let mut total_volume = 0.0;
    for _ in 0..payments {
        let amount = random_amount(&mut rng);
        let receipt = engine.record_payment(user_id, amount, Some("batch"))?;
        total_volume += amount.abs();
        if receipt.fee > 0.0 {
            charged += 1;
            total_fees += receipt.fee;
        }
    }

    print_summary(engine, user_id, payments, charged, total_fees, total_volume)
}

/// Mostly small expenses, some large ones, a fifth incomes.
fn random_amount(rng: &mut Pcg64Mcg) -> f64 {
    let magnitude = if rng.gen_bool(0.8) {
        rng.gen_range(1.0..250.0)
    } else {
        rng.gen_range(250.0..5000.0)
    };
    let cents = (magnitude * 100.0_f64).round() / 100.0;
    if rng.gen_bool(0.2) {
        cents
    } else {
        -cents
    }
}

/// Three intervals whose fee falls as a user pays more often in them.
fn default_plan(engine: &FeeEngine) -> FeePlanView {
    let mut plan = FeePlanView {
        mode: FeeMode::Table,
        amount_table: vec![0.0, 100.0, 1000.0],
        ..FeePlanView::default()
    };
    let curves = [
        ("0", 0.03, vec![CurvePoint::new(0.0, 0.03), CurvePoint::new(0.5, 0.02), CurvePoint::new(1.0, 0.01)]),
        ("100", 0.02, vec![CurvePoint::new(0.0, 0.02), CurvePoint::new(1.0, 0.005)]),
        ("1000", 0.01, vec![]),
    ];
    for (key, max_fee, points) in curves {
        plan.interval_data
            .insert(key.to_string(), engine.fit_interval(&points, max_fee));
    }
    plan
}

fn print_summary(
    engine: &FeeEngine,
    user_id: UserId,
    payments: usize,
    charged: usize,
    total_fees: f64,
    total_volume: f64,
) -> Result<()> {
    let history = engine.fee_history(user_id)?;
    let records = engine.fee_records(user_id)?;
    let effective = if total_volume > 0.0 { total_fees / total_volume * 100.0 } else { 0.0 };

    println!("=== FEE SUMMARY ===");
    println!("  payments recorded: {payments}");
    println!("  fees charged:      {charged}");
    println!("  fee records:       {}", records.len());
    println!("  total fees:        {total_fees:.2}");
    println!("  total volume:      {total_volume:.2}");
    println!("  effective rate:    {effective:.3}%");
    println!("  ledger events:     {}", history.len());
    Ok(())
}

fn run_ipc_loop(engine: &FeeEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let response = match handle_command(engine, cmd) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("runner: command failed: {e}");
                json!({ "error": e.to_string() })
            }
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &FeeEngine, cmd: IpcCommand) -> Result<Value> {
    let response = match cmd {
        IpcCommand::GetPlan { user_id } => serde_json::to_value(engine.get_fee_plan(user_id)?)?,
        IpcCommand::PutPlan { user_id, plan } => {
            let saved = engine.put_fee_plan(user_id, plan)?;
            serde_json::to_value(saved.to_view())?
        }
        IpcCommand::ValidateFormula { formula_text } => {
            json!({ "valid": engine.validate_formula(&formula_text) })
        }
        IpcCommand::FitInterval { points, max_fee } => {
            serde_json::to_value(engine.fit_interval(&points, max_fee))?
        }
        IpcCommand::ComputeFee { user_id, amount } => {
            json!({ "fee": engine.compute_fee(user_id, amount)? })
        }
        IpcCommand::RecordPayment { user_id, amount, description } => {
            serde_json::to_value(engine.record_payment(user_id, amount, description.as_deref())?)?
        }
        IpcCommand::UpdatePayment { payment_id, amount } => {
            serde_json::to_value(engine.update_payment_amount(payment_id, amount)?)?
        }
        IpcCommand::DeletePayment { payment_id } => {
            json!({ "refunded_fee": engine.delete_payment(payment_id)? })
        }
        IpcCommand::ListPayments { user_id } => serde_json::to_value(engine.payments_for_user(user_id)?)?,
        IpcCommand::ListFeeRecords { user_id } => serde_json::to_value(engine.fee_records(user_id)?)?,
        IpcCommand::Quit => Value::Null,
    };
    Ok(response)
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
