//! Prometheus text exposition format.
//!
//! Renders a [`GlobalSnapshot`] as gauges with `model`, `block` and
//! `peer` labels for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use shardwatch_state::{GlobalSnapshot, ModelStatus, Reachability};

/// Content type of the exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Escape a label value (backslash, double quote and newline).
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

/// Render a snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &GlobalSnapshot) -> String {
    let mut out = String::new();

    header(
        &mut out,
        "shardwatch_model_status",
        "1 for the model's current status, 0 for the others.",
    );
    for m in &snapshot.models {
        let model = escape(&m.name);
        for status in ModelStatus::ALL {
            let _ = writeln!(
                out,
                "shardwatch_model_status{{model=\"{model}\",status=\"{}\"}} {}",
                status.as_str(),
                u8::from(m.status == status)
            );
        }
    }

    header(
        &mut out,
        "shardwatch_model_block_coverage",
        "Blocks with at least one fresh, reachable server.",
    );
    for m in &snapshot.models {
        let _ = writeln!(
            out,
            "shardwatch_model_block_coverage{{model=\"{}\"}} {}",
            escape(&m.name),
            m.block_coverage
        );
    }

    header(
        &mut out,
        "shardwatch_model_num_blocks",
        "Number of blocks the model is split into.",
    );
    for m in &snapshot.models {
        let _ = writeln!(
            out,
            "shardwatch_model_num_blocks{{model=\"{}\"}} {}",
            escape(&m.name),
            m.num_blocks
        );
    }

    header(
        &mut out,
        "shardwatch_block_covered",
        "Whether a block is covered (1) or not (0).",
    );
    for m in &snapshot.models {
        let model = escape(&m.name);
        for b in &m.blocks {
            let _ = writeln!(
                out,
                "shardwatch_block_covered{{model=\"{model}\",block=\"{}\"}} {}",
                b.index,
                u8::from(b.covered)
            );
        }
    }

    header(
        &mut out,
        "shardwatch_block_redundancy",
        "Fresh, reachable servers holding a block.",
    );
    for m in &snapshot.models {
        let model = escape(&m.name);
        for b in &m.blocks {
            let _ = writeln!(
                out,
                "shardwatch_block_redundancy{{model=\"{model}\",block=\"{}\"}} {}",
                b.index, b.redundancy
            );
        }
    }

    header(
        &mut out,
        "shardwatch_bootstrap_reachable",
        "Whether a bootstrap peer answered the last probe.",
    );
    for peer in &snapshot.bootstrap_states {
        let _ = writeln!(
            out,
            "shardwatch_bootstrap_reachable{{peer=\"{}\"}} {}",
            escape(&peer.peer_id.to_base58()),
            u8::from(peer.reachability == Reachability::Reachable)
        );
    }

    header(
        &mut out,
        "shardwatch_snapshot_generation",
        "Generation of the published snapshot.",
    );
    let _ = writeln!(out, "shardwatch_snapshot_generation {}", snapshot.generation);

    header(
        &mut out,
        "shardwatch_update_duration_seconds",
        "Wall time of the cycle that built the snapshot.",
    );
    let _ = writeln!(
        out,
        "shardwatch_update_duration_seconds {:.3}",
        snapshot.update_duration_secs
    );

    out
}
