// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! sketchwire-robo - headless whiteboard bot
//!
//! Joins the LAN session like any other peer and publishes random strokes
//! at a fixed rate. Useful for soak-testing discovery, gating and recovery
//! without a UI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sketchwire::node::MemoryCanvas;
use sketchwire::{Color, DrawOp, Node, NodeEvent, Point};

/// Headless whiteboard bot
#[derive(Parser, Debug)]
#[command(name = "sketchwire-robo")]
#[command(version)]
#[command(about = "Join a whiteboard session and scribble random strokes")]
struct Args {
    /// Display name announced to peers
    #[arg(short = 'N', long, default_value = "robo")]
    name: String,

    /// Number of strokes to publish (0 = until interrupted)
    #[arg(short = 'n', long, default_value = "0")]
    count: u64,

    /// Delay between strokes in milliseconds
    #[arg(short, long, default_value = "200")]
    interval: u64,

    /// Simulated inbound loss ratio in percent (0-100)
    #[arg(short, long, default_value = "0")]
    loss: i32,

    /// Print node events as they happen
    #[arg(short, long)]
    verbose: bool,
}

fn random_stroke(cursor: &mut Point) -> DrawOp {
    let next = Point::new(
        cursor.x.saturating_add_signed(fastrand::i16(-40..=40)).min(9999),
        cursor.y.saturating_add_signed(fastrand::i16(-40..=40)).min(9999),
    );
    let op = DrawOp::Freeform {
        start: *cursor,
        end: next,
        color: Color::new(fastrand::u8(..), fastrand::u8(..), fastrand::u8(..)),
        weight: fastrand::u8(1..=5),
    };
    *cursor = next;
    op
}

fn main() -> sketchwire::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let canvas = Arc::new(MemoryCanvas::new());
    let mut node = Node::builder(args.name.clone())
        .handler(canvas.clone())
        .start()?;
    println!(
        "{} up as {} with {} peer(s), canvas {} op(s)",
        args.name,
        node.local(),
        node.peers().len(),
        canvas.len()
    );

    if args.loss != 0 {
        let effective = node.set_loss_ratio(args.loss);
        println!("simulating {}% inbound loss", effective);
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Relaxed))
        .map_err(|e| sketchwire::Error::InvalidState(format!("signal handler: {}", e)))?;

    let events = node.events();
    let mut cursor = Point::new(500, 500);
    let mut published = 0u64;
    while running.load(Ordering::Relaxed) {
        if args.count != 0 && published >= args.count {
            break;
        }
        node.publish(random_stroke(&mut cursor))?;
        published += 1;

        if args.verbose {
            while let Ok(event) = events.try_recv() {
                match event {
                    NodeEvent::PeerAdded(host) => println!("peer joined: {}", host),
                    NodeEvent::PeerRemoved(host) => println!("peer left: {}", host),
                    NodeEvent::SnapshotServed(host) => println!("served snapshot to {}", host),
                    NodeEvent::RecoveryRequested(id) => println!("requested recovery of {}", id),
                    other => println!("{:?}", other),
                }
            }
        }
        std::thread::sleep(Duration::from_millis(args.interval));
    }

    println!(
        "done: {} stroke(s) published, {} op(s) on canvas, {} message(s) in history",
        published,
        canvas.len(),
        node.history_len()
    );
    node.shutdown();
    Ok(())
}
