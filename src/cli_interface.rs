// File: src/cli_interface.rs
// One-shot CLI view: sync once, print the view model, exit

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

use crate::data_models::{BlockDetail, BlockSummary, MarketSnapshot};
use crate::sync::{ResourceStatus, Synchronizer, ViewModel};

/// Run one synchronization pass and print the settled view
pub async fn run_cli_mode(
    sync: &mut Synchronizer,
    poll_interval: Duration,
    hash: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    if let Some(hash) = &hash {
        sync.select_block(hash)?;
    }

    let mut updates = sync.subscribe();
    sync.start(poll_interval);

    let settled = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        updates.wait_for(|view| view.is_settled()),
    )
    .await
    .map(|waited| waited.is_ok());
    let view = sync.snapshot();
    sync.stop().await;

    match settled {
        Ok(true) => {}
        Ok(false) => anyhow::bail!("Synchronizer closed before the view settled"),
        Err(_) => {
            warn!("View not settled after {}s", timeout_secs);
            println!("⚠️  Timed out after {}s, showing partial data", timeout_secs);
        }
    }

    print_view(&view);
    Ok(())
}

fn print_view(view: &ViewModel) {
    if view.recent_blocks.is_empty() {
        println!("No blocks returned by the repository.");
    } else {
        print_blocks_table(&view.recent_blocks, view.selected_hash.as_deref());
        print_block_statistics(&view.recent_blocks);
    }
    print_status_line("Blocks", &view.status.recent_blocks);

    match (&view.selected_detail, &view.selected_hash) {
        (Some(detail), _) => print_block_detail(detail),
        (None, Some(hash)) => println!("\n🔍 No detail available for {}", truncate_hash(hash, 64)),
        (None, None) => {}
    }
    print_status_line("Detail", &view.status.selected_detail);

    if let Some(market) = &view.market {
        print_market(market);
    }
    print_status_line("Market", &view.status.market);

    if let Some(series) = &view.price_series {
        if let (Some((lo, hi)), Some(latest)) = (series.price_bounds(), series.latest()) {
            println!(
                "\n📈 {}d price range: ${:.2} - ${:.2}, last ${:.2} ({} samples)",
                series.window.days,
                lo,
                hi,
                latest.price_usd,
                series.points.len()
            );
        }
    }
    print_status_line("Chart", &view.status.price_series);
}

/// Print the last error for a resource, if any
fn print_status_line(label: &str, status: &ResourceStatus) {
    if let Some(err) = &status.last_error {
        println!("❌ {}: {} ({})", label, err.message, err.kind.label());
    }
}

/// Print blocks in a formatted table; the selected block is marked with `▶`
fn print_blocks_table(blocks: &[BlockSummary], selected: Option<&str>) {
    println!();
    println!("╭─{:─<1}─┬─{:─<8}─┬─{:─<64}─┬─{:─<23}─┬─{:─<10}─╮", "", "", "", "", "");
    println!("│ {:1} │ {:^8} │ {:^64} │ {:^23} │ {:^10} │", "", "Height", "Hash", "Timestamp", "Interval");
    println!("├─{:─<1}─┼─{:─<8}─┼─{:─<64}─┼─{:─<23}─┼─{:─<10}─┤", "", "", "", "", "");

    for (i, block) in blocks.iter().enumerate() {
        let mark = if Some(block.hash.as_str()) == selected { "▶" } else { " " };
        println!(
            "│ {} │ {:>8} │ {:<64} │ {:<23} │ {:>10} │",
            mark,
            block.height,
            truncate_hash(&block.hash, 64),
            block.time.format("%Y-%m-%d %H:%M:%S UTC"),
            calculate_interval(blocks, i)
        );
    }

    println!("╰─{:─<1}─┴─{:─<8}─┴─{:─<64}─┴─{:─<23}─┴─{:─<10}─╯", "", "", "", "", "");
}

/// Gap to the next older block (the list is newest first)
fn calculate_interval(blocks: &[BlockSummary], index: usize) -> String {
    let Some(older) = blocks.get(index + 1) else {
        return "─".to_string();
    };
    let diff = (blocks[index].time - older.time).num_seconds();
    if diff > 0 {
        format_duration(diff)
    } else {
        "⚠ -time".to_string()
    }
}

fn print_block_statistics(blocks: &[BlockSummary]) {
    let intervals: Vec<i64> = blocks
        .windows(2)
        .map(|pair| (pair[0].time - pair[1].time).num_seconds())
        .filter(|&diff| diff > 0)
        .collect();
    let (Some(min), Some(max)) = (intervals.iter().min(), intervals.iter().max()) else {
        return;
    };
    let avg = intervals.iter().sum::<i64>() / intervals.len() as i64;

    println!();
    println!(
        "📊 Block Intervals: avg {}, min {}, max {}",
        format_duration(avg),
        format_duration(*min),
        format_duration(*max)
    );
}

/// Format duration in seconds to human-readable string
fn format_duration(seconds: i64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => {
            let (mins, secs) = (s / 60, s % 60);
            if secs == 0 { format!("{}m", mins) } else { format!("{}m {}s", mins, secs) }
        }
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

fn print_block_detail(block: &BlockDetail) {
    println!();
    println!("🔍 Block Detail View");
    println!("╭─{:─<70}─╮", "");
    println!("│ Height: {:>10}  Hash: {:<46} │", block.summary.height, truncate_hash(block.hash(), 46));
    println!("│ Timestamp: {:<25} Peers: {:>23} │", block.timestamp.format("%Y-%m-%d %H:%M:%S UTC"), block.peer_count);
    println!("│ Previous Hash: {:<55} │", truncate_hash(&block.previous_hash, 55));
    println!("├─{:─<70}─┤", "");
    println!(
        "│ 💸 Fees  high: {:>6}  medium: {:>6}  low: {:>6}{:19} │",
        block.fee_tiers.high, block.fee_tiers.medium, block.fee_tiers.low, ""
    );
    if let Some(price) = block.price {
        println!("│ Price: {:<63} │", format!("${:.2}", price));
    }
    if let Some(count) = block.unconfirmed_count {
        println!("│ Unconfirmed transactions: {:<44} │", count);
    }
    if let Some(volume) = block.volume_24h {
        println!("│ 24h volume: {:<58} │", format!("${:.0}", volume));
    }
    println!("╰─{:─<70}─╯", "");
}

fn print_market(market: &MarketSnapshot) {
    println!();
    println!("💰 Market Snapshot ({})", market.captured_at.format("%H:%M:%S UTC"));
    println!("   Price:        ${:.2}", market.price_usd);
    println!("   Market cap:   ${:.0}", market.market_cap_usd);
    println!("   Volume 24h:   ${:.0}", market.volume_24h_usd);
    println!("   Change 24h:   {:+.2}%", market.price_change_24h_pct);
    println!("   Change 7d:    {:+.2}%", market.price_change_7d_pct);
    println!("   Supply:       {:.0}", market.circulating_supply);
    println!("   Dominance:    {:.2}%", market.dominance_pct);
    println!("   All-time high ${:.2}", market.ath_usd);
}

/// Keep at most `max_len` characters; hashes typed on the command line need not be hex
fn truncate_hash(hash: &str, max_len: usize) -> String {
    hash.char_indices()
        .nth(max_len)
        .map_or(hash, |(cut, _)| &hash[..cut])
        .to_string()
}
