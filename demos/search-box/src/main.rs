//! # Search Box Demo
//!
//! Simulates someone typing into a search box. Each keystroke is fed to a
//! governor; a "search" runs only when typing pauses, when the query has been
//! pending too long, or when Enter is pressed.

use anyhow::Result;
use bounce_core::{Chain, Governor, Resolution};
use std::time::Duration;
use tracing::info;

// ============================================================================
// Keystrokes
// ============================================================================

#[derive(Debug, Clone)]
struct Keystroke {
    query: String,
    enter: bool,
}

/// (text typed so far, pause after the keystroke in ms)
const SCRIPT: &[(&str, u64)] = &[
    ("r", 40),
    ("ru", 60),
    ("rus", 30),
    ("rust", 400),
    ("rust a", 70),
    ("rust as", 50),
    ("rust asy", 80),
    ("rust asyn", 90),
    ("rust async", 20),
    ("rust async\n", 300),
];

// ============================================================================
// Governor callbacks
// ============================================================================

/// Pressing Enter searches immediately.
fn control(chain: &mut Chain<Keystroke>) {
    if chain.arguments().is_some_and(|key| key.enter) {
        chain.bounce();
    }
}

fn search(resolution: Resolution<Keystroke>) {
    let query = resolution
        .arguments
        .map(|key| key.query)
        .unwrap_or_default();
    info!(
        query = %query,
        keystrokes = resolution.call_count,
        trigger = %resolution.trigger,
        "searching"
    );
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info,bounce_core=debug")
        .init();

    let governor = Governor::builder(Duration::from_millis(150))
        .max_delay(Duration::from_millis(300))
        .control(control)
        .build(search)?;

    for (typed, pause) in SCRIPT {
        let enter = typed.ends_with('\n');
        governor.trigger(Keystroke {
            query: typed.trim_end().to_string(),
            enter,
        });
        tokio::time::sleep(Duration::from_millis(*pause)).await;
    }

    // Typing that gets abandoned never searches.
    governor.trigger(Keystroke {
        query: "rust tok".to_string(),
        enter: false,
    });
    governor.cancel();
    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("Demo complete!");
    Ok(())
}
