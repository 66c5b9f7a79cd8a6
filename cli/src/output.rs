//! Human-readable and JSON rendering of snapshots and provenance.

use std::sync::Arc;

use anyhow::Result;
use chrono::SecondsFormat;

use coldchain_core::snapshot::{ShipmentSnapshot, StatusSource};
use coldchain_evm::Provenance;

pub fn print_snapshots(snapshots: &[Arc<ShipmentSnapshot>], as_json: bool) -> Result<()> {
    if as_json {
        for snap in snapshots {
            print_snapshot(snap, true)?;
        }
        return Ok(());
    }
    if snapshots.is_empty() {
        println!("No shipments found in the discovery window.");
        return Ok(());
    }
    println!(
        "{:<20} {:<16} {:>8} {:>8} {:>10}  {}",
        "SHIPMENT", "STATUS", "BREACHES", "READINGS", "LAST °C", "LAST READING"
    );
    for snap in snapshots {
        print_snapshot(snap, false)?;
    }
    Ok(())
}

pub fn print_snapshot(snap: &ShipmentSnapshot, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(snap)?);
        return Ok(());
    }

    let id = snap
        .shipment_id
        .clone()
        .unwrap_or_else(|| snap.key.short());
    let status = match snap.status_source {
        StatusSource::Pending => "(loading)".to_string(),
        StatusSource::Inferred => format!("{}*", snap.status),
        StatusSource::Ledger => snap.status.to_string(),
    };
    let latest = snap.readings_desc().next();
    let celsius = latest.map_or_else(|| "-".to_string(), |r| format!("{:.2}", r.celsius()));
    let at = latest
        .and_then(|r| r.recorded_at())
        .map_or_else(|| "-".to_string(), |t| t.to_rfc3339_opts(SecondsFormat::Secs, true));

    println!(
        "{:<20} {:<16} {:>8} {:>8} {:>10}  {}",
        id,
        status,
        snap.breach_count,
        snap.readings.len(),
        celsius,
        at
    );
    if let Some((ledger, classified)) = snap.breach_divergence() {
        println!("    ! ledger reports {ledger} breaches, {classified} out-of-band readings in view");
    }
    Ok(())
}

pub fn print_provenance(p: &Provenance, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(p)?);
        return Ok(());
    }

    println!("Block #{}", p.block.number);
    println!("  hash:              {}", p.block.hash);
    println!("  parent:            {}", p.block.parent_hash);
    println!("  timestamp:         {}", p.block.timestamp);
    println!("  transactions root: {}", p.block.transactions_root);
    println!("  receipts root:     {}", p.block.receipts_root);
    println!("  state root:        {}", p.block.state_root);
    println!("  transactions:      {}", p.block.tx_hashes.len());
    match &p.previous {
        Some(b) => println!("  previous:          #{} {}", b.number, b.hash),
        None => println!("  previous:          -"),
    }
    match &p.next {
        Some(b) => println!("  next:              #{} {}", b.number, b.hash),
        None => println!("  next:              - (head)"),
    }
    println!("  linked:            {}", if p.is_linked() { "yes" } else { "NO" });

    if let Some(r) = &p.receipt {
        println!();
        println!("Transaction {}", r.tx_hash);
        println!("  from:     {}", r.from);
        println!("  gas used: {}", r.gas_used);
        println!("  status:   {}", if r.status { "success" } else { "reverted" });
        println!("  block:    #{}", r.block_number);
        println!("  in block: {}", if p.includes_tx() { "yes" } else { "no" });
    }
    Ok(())
}
