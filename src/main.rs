//! Investment Simulation Walkthrough.
//!
//! Drives the engine end to end with scripted decisions and a static price
//! table: a mixed decision cycle, a malformed payload, a liquidation sweep,
//! a stop-loss trigger, and final settlement.

use rust_decimal_macros::dec;
use simvest_core::*;
use std::sync::Arc;

type DemoEngine = Engine<Arc<StaticPrices>, ScriptedDecisions, LogNotifier>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simvest_core=info".into()),
        )
        .init();

    println!("AI Investment Simulation Engine");
    println!("Scripted decisions, static prices, full session lifecycle\n");

    let market = Arc::new(StaticPrices::new());
    market.set(AssetId::new("bitcoin"), Price::new_unchecked(dec!(50000)));
    market.set(AssetId::new("ethereum"), Price::new_unchecked(dec!(2500)));

    let decisions = ScriptedDecisions::new();
    script_decisions(&decisions);

    let engine = Engine::new(SimConfig::default(), market.clone(), decisions, LogNotifier)
        .expect("default config is valid");

    scenario_1_mixed_cycle(&engine).await;
    scenario_2_malformed_payload(&engine).await;
    scenario_3_liquidation(&engine, &market).await;
    scenario_4_stop_loss(&engine, &market).await;
    scenario_5_settlement(&engine).await;

    println!("\nAll scenarios completed.");
}

fn script_decisions(decisions: &ScriptedDecisions) {
    // scenario 1: buy spot, open a leveraged long, protect it
    decisions.push(
        r#"{
            "analysis": "accumulating btc, leveraged eth exposure with a stop",
            "actions": [
                {"action": "BUY_SPOT", "asset": "bitcoin", "quantity": 0.02},
                {"action": "OPEN_LONG", "asset": "ethereum", "margin": 400, "leverage": 5},
                {"action": "SET_STOP_LOSS", "asset": "ethereum", "stop_price": 2300}
            ]
        }"#,
    );
    // scenario 2: one good instruction, two bad ones
    decisions.push(
        r#"Here is my plan:
        ```json
        {
            "analysis": "partial nonsense on purpose",
            "actions": [
                {"action": "BUY_SPOT", "asset": "bitcoin", "quantity": 0.01},
                {"action": "BUY_SPOT", "asset": "bitcoin", "quantity": -5},
                {"action": "MOON_EVERYTHING", "asset": "bitcoin"}
            ]
        }
        ```"#,
    );
    // scenario 3: a short that the market will run over
    decisions.push(
        r#"{
            "analysis": "fading the rally",
            "actions": [
                {"action": "OPEN_SHORT", "asset": "bitcoin", "margin": 300, "leverage": 10}
            ]
        }"#,
    );
}

async fn scenario_1_mixed_cycle(engine: &DemoEngine) {
    println!("Scenario 1: Mixed Decision Cycle\n");

    let session = engine.start_session(Quote::new(dec!(10000))).await.unwrap();
    let result = engine.submit_decision_cycle(session).await.unwrap();

    println!("  applied: {}, rejected: {}", result.applied_count(), result.rejected_count());

    let status = engine.get_status(session).await.unwrap();
    println!("  cash: ${}, equity: ${}", status.cash, status.equity);
    for pos in &status.futures {
        println!(
            "  {} {} {}: entry ${}, liq ${}, stop {:?}",
            pos.side,
            pos.quantity,
            pos.asset,
            pos.entry_price,
            pos.liquidation_price,
            pos.stop_loss.map(|p| p.value()),
        );
    }
    println!();
}

async fn scenario_2_malformed_payload(engine: &DemoEngine) {
    println!("Scenario 2: Malformed Payload Quarantine\n");

    let session = engine.start_session(Quote::new(dec!(5000))).await.unwrap();
    let result = engine.submit_decision_cycle(session).await.unwrap();

    println!(
        "  {} applied, {} quarantined at parse",
        result.applied_count(),
        result.parse_errors.len()
    );
    for error in &result.parse_errors {
        println!("    {error}");
    }
    println!();
}

async fn scenario_3_liquidation(engine: &DemoEngine, market: &StaticPrices) {
    println!("Scenario 3: Liquidation Sweep\n");

    let session = engine.start_session(Quote::new(dec!(2000))).await.unwrap();
    engine.submit_decision_cycle(session).await.unwrap();
    println!("  10x short opened at $50,000");

    // price rips 12% against the short; margin is gone
    market.set(AssetId::new("bitcoin"), Price::new_unchecked(dec!(56000)));

    let closures = engine.poll_risk().await;
    for closure in &closures {
        println!(
            "  {} closed {} {}: pnl ${}",
            closure.trigger.describe(),
            closure.side,
            closure.asset,
            closure.realized_pnl
        );
    }

    let status = engine.get_status(session).await.unwrap();
    println!("  cash after liquidation: ${}\n", status.cash);

    market.set(AssetId::new("bitcoin"), Price::new_unchecked(dec!(50000)));
}

async fn scenario_4_stop_loss(engine: &DemoEngine, market: &StaticPrices) {
    println!("Scenario 4: Stop-Loss Trigger\n");

    // scenario 1 left a 5x ethereum long with a stop at 2300
    market.set(AssetId::new("ethereum"), Price::new_unchecked(dec!(2250)));

    let closures = engine.poll_risk().await;
    if closures.is_empty() {
        println!("  no triggers fired");
    }
    for closure in &closures {
        println!(
            "  {} closed {} {} at pnl ${}",
            closure.trigger.describe(),
            closure.side,
            closure.asset,
            closure.realized_pnl
        );
    }
    println!();
}

async fn scenario_5_settlement(engine: &DemoEngine) {
    println!("Scenario 5: Settlement\n");

    let report = engine.finish_session(SessionId(1)).await.unwrap();
    println!(
        "  initial ${} -> final ${} ({}%)",
        report.initial_capital, report.final_equity, report.return_pct
    );
    println!(
        "  spot pnl ${}, futures pnl ${}, {} wins / {} losses",
        report.spot_pnl, report.futures_pnl, report.wins, report.losses
    );

    // settling again returns the identical report
    let again = engine.finish_session(SessionId(1)).await.unwrap();
    println!("  second finish returned the same report: {}", report == again);

    let rejected = engine.submit_decision_cycle(SessionId(1)).await;
    println!("  further instructions rejected: {}", rejected.is_err());
}
