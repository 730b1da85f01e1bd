//! Terminal output with configurable verbosity levels.
//!
//! Supports three verbosity levels:
//! - Minimal: one line per entry
//! - Compact: aligned table rows
//! - Verbose: one block per entry between separator lines

use crate::config::LogVerbosity;
use crate::free_models::FreeModel;
use crate::manager::BackendStatus;
use crate::router::ModelStatSnapshot;
use crate::types::{ModelDescriptor, StreamUnit, Usage};
use std::collections::BTreeMap;
use std::io::Write;

const SEPARATOR: &str = "────────────────────────────────────────";

/// Format duration in human-readable form.
pub fn format_duration(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

fn format_context(tokens: u32) -> String {
    if tokens >= 1000 {
        format!("{}k", tokens / 1000)
    } else {
        tokens.to_string()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

// ============================================================================
// Router statistics
// ============================================================================

pub fn format_router_stats(stats: &BTreeMap<String, ModelStatSnapshot>, verbosity: &LogVerbosity) -> String {
    if stats.is_empty() {
        return "no enabled models".to_string();
    }

    let latency = |stat: &ModelStatSnapshot| {
        stat.average_latency_secs
            .map(|secs| format_duration((secs * 1000.0) as u64))
            .unwrap_or_else(|| "-".to_string())
    };
    let state = |stat: &ModelStatSnapshot| if stat.available { "up" } else { "DOWN" };

    match verbosity {
        LogVerbosity::Minimal => stats
            .values()
            .map(|stat| {
                format!(
                    "{} {} {}/{} {:.0}%",
                    stat.model_id,
                    state(stat),
                    stat.success_count,
                    stat.request_count,
                    stat.success_rate * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        LogVerbosity::Compact => {
            let width = stats.keys().map(String::len).max().unwrap_or(0).max(5);
            let mut lines = vec![format!("{:<width$}  {:<4}  {:>5}  {:>5}  {:>7}", "MODEL", "STATE", "REQS", "RATE", "LATENCY")];
            for stat in stats.values() {
                lines.push(format!(
                    "{:<width$}  {:<4}  {:>5}  {:>4.0}%  {:>7}",
                    stat.model_id,
                    state(stat),
                    stat.request_count,
                    stat.success_rate * 100.0,
                    latency(stat)
                ));
            }
            lines.join("\n")
        }
        LogVerbosity::Verbose => {
            let mut blocks = vec![SEPARATOR.to_string()];
            for stat in stats.values() {
                let last_used = stat
                    .last_used
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                blocks.push(format!(
                    "Model:     {}\n\
                     Backend:   {}\n\
                     Available: {}\n\
                     Requests:  {} ({} ok, {} failed, {:.1}% success)\n\
                     Latency:   {} avg\n\
                     Last used: {}\n\
                     {}",
                    stat.model_id,
                    if stat.backend.is_empty() { "-" } else { stat.backend.as_str() },
                    yes_no(stat.available),
                    stat.request_count,
                    stat.success_count,
                    stat.failure_count,
                    stat.success_rate * 100.0,
                    latency(stat),
                    last_used,
                    SEPARATOR
                ));
            }
            blocks.join("\n")
        }
    }
}

// ============================================================================
// Backends
// ============================================================================

pub fn format_backend_status(status: &BTreeMap<String, BackendStatus>, verbosity: &LogVerbosity) -> String {
    if status.is_empty() {
        return "no backends registered".to_string();
    }

    let state = |s: &BackendStatus| if s.connected { "connected" } else { "unreachable" };

    match verbosity {
        LogVerbosity::Minimal => status
            .iter()
            .map(|(name, s)| format!("{} {}", name, state(s)))
            .collect::<Vec<_>>()
            .join("\n"),
        LogVerbosity::Compact => {
            let width = status.keys().map(String::len).max().unwrap_or(0).max(7);
            let mut lines = vec![format!("{:<width$}  {:<11}  {:<10}  {}", "BACKEND", "STATE", "KIND", "MODEL")];
            for (name, s) in status {
                lines.push(format!(
                    "{:<width$}  {:<11}  {:<10}  {}",
                    name,
                    state(s),
                    s.kind.to_string(),
                    s.default_model
                ));
            }
            lines.join("\n")
        }
        LogVerbosity::Verbose => {
            let mut blocks = vec![SEPARATOR.to_string()];
            for (name, s) in status {
                let error = s.error.as_deref().map(|e| format!("\nError:      {}", e)).unwrap_or_default();
                blocks.push(format!(
                    "Backend:    {}\n\
                     Kind:       {}\n\
                     Endpoint:   {}\n\
                     Model:      {}\n\
                     Credential: {}\n\
                     Status:     {}{}\n\
                     {}",
                    name,
                    s.kind,
                    s.endpoint,
                    s.default_model,
                    yes_no(s.has_credential),
                    state(s),
                    error,
                    SEPARATOR
                ));
            }
            blocks.join("\n")
        }
    }
}

/// Model descriptors grouped by backend.
pub fn format_models(models: &BTreeMap<String, Vec<ModelDescriptor>>, verbosity: &LogVerbosity) -> String {
    let mut lines = Vec::new();
    for (backend, descriptors) in models {
        match verbosity {
            LogVerbosity::Minimal => {
                lines.extend(descriptors.iter().map(|m| format!("{}:{}", backend, m.id)));
            }
            LogVerbosity::Compact => {
                lines.push(format!("{} ({} models)", backend, descriptors.len()));
                lines.extend(descriptors.iter().map(|m| {
                    let price = if m.is_free() { "free".to_string() } else { format!("${}/1k in", m.input_price_per_1k) };
                    format!("  {}  [{} ctx, {}]", m.id, format_context(m.max_context_length), price)
                }));
            }
            LogVerbosity::Verbose => {
                lines.push(SEPARATOR.to_string());
                lines.push(format!("Backend: {}", backend));
                for m in descriptors {
                    lines.push(format!(
                        "  {} ({})\n    context {} = {} in + {} out, ${}/1k in, ${}/1k out",
                        m.id,
                        m.name,
                        m.max_context_length,
                        m.max_input_tokens,
                        m.max_output_tokens,
                        m.input_price_per_1k,
                        m.output_price_per_1k
                    ));
                }
            }
        }
    }
    if matches!(verbosity, LogVerbosity::Verbose) && !lines.is_empty() {
        lines.push(SEPARATOR.to_string());
    }
    lines.join("\n")
}

pub fn format_free_models(models: &[FreeModel], verbosity: &LogVerbosity) -> String {
    let flags = |m: &FreeModel| {
        let mut flags = Vec::new();
        if m.reasoning {
            flags.push("reasoning");
        }
        if m.vision {
            flags.push("vision");
        }
        if m.function_calling {
            flags.push("tools");
        }
        flags.join(",")
    };

    match verbosity {
        LogVerbosity::Minimal => models.iter().map(|m| m.id.clone()).collect::<Vec<_>>().join("\n"),
        LogVerbosity::Compact => models
            .iter()
            .map(|m| format!("{}  [{} ctx] {}", m.id, format_context(m.context_length), flags(m)))
            .collect::<Vec<_>>()
            .join("\n"),
        LogVerbosity::Verbose => {
            let mut blocks = vec![SEPARATOR.to_string()];
            for m in models {
                blocks.push(format!(
                    "{}\n{}\nContext: {} tokens\nFlags:   {}\n{}\n{}",
                    m.name,
                    m.id,
                    m.context_length,
                    if flags(m).is_empty() { "-".to_string() } else { flags(m) },
                    m.description,
                    SEPARATOR
                ));
            }
            blocks.join("\n")
        }
    }
}

// ============================================================================
// Streamed responses
// ============================================================================

/// Format request start (for streaming).
pub fn format_request_start(backend: &str, model: &str, verbosity: &LogVerbosity) -> String {
    match verbosity {
        LogVerbosity::Minimal => format!("{} {}", backend, model),
        LogVerbosity::Compact => format!("→ {} [{}]", backend, model),
        LogVerbosity::Verbose => format!(
            "{}\n\
             Backend: {}\n\
             Model: {}",
            SEPARATOR, backend, model
        ),
    }
}

/// Format the summary after a streamed response completes.
pub fn format_response_end(units: &[StreamUnit], elapsed_ms: u64, verbosity: &LogVerbosity) -> String {
    let duration = format_duration(elapsed_ms);
    let usage: Option<&Usage> = units.iter().rev().find_map(|u| u.usage.as_ref());
    let tokens = usage.map(|u| u.total_tokens.to_string()).unwrap_or_else(|| "-".to_string());
    let last = units.last();
    let model = last.map(|u| u.model.as_str()).unwrap_or("-");
    let backend = last.map(|u| u.backend.as_str()).unwrap_or("-");

    match verbosity {
        LogVerbosity::Minimal => format!("{} {} units {} tokens", duration, units.len(), tokens),
        LogVerbosity::Compact => format!("← {} [{}] ({}, {} units, {} tokens)", backend, model, duration, units.len(), tokens),
        LogVerbosity::Verbose => {
            let (prompt, completion) = usage
                .map(|u| (u.prompt_tokens.to_string(), u.completion_tokens.to_string()))
                .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
            let request_id = last.map(|u| u.request_id.as_str()).unwrap_or("-");
            format!(
                "Request: {}\n\
                 Backend: {} [{}]\n\
                 Timing: {} total, {} units\n\
                 Tokens: {} prompt, {} completion, {} total\n\
                 {}",
                request_id, backend, model, duration, units.len(), prompt, completion, tokens, SEPARATOR
            )
        }
    }
}

/// Write a formatted block to the given writer.
pub fn write_block<W: Write>(writer: &mut W, block: &str) -> std::io::Result<()> {
    writeln!(writer, "{}", block)
}
