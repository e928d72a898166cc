//! List running sandboxes.

use anyhow::Result;
use colored::Colorize;
use std::fmt::Write;

use super::{format_port_pairs, manager};
use crate::manager::SandboxInfo;

/// Render sandboxes as an aligned table.
///
/// The namespace column only appears when listing every project.
pub fn format_table(sandboxes: &[SandboxInfo], namespace: &str, all_namespaces: bool) -> String {
    let mut out = String::new();
    if sandboxes.is_empty() {
        if all_namespaces {
            writeln!(&mut out, "No sandboxes running.").unwrap();
        } else {
            writeln!(&mut out, "No sandboxes running for this project.").unwrap();
            writeln!(&mut out, "Use -a to see sandboxes from all projects.").unwrap();
        }
        return out;
    }

    let mut headers = vec!["NAME", "BRANCH", "PORTS"];
    if all_namespaces {
        headers.push("NAMESPACE");
    }
    let rows: Vec<Vec<String>> = sandboxes
        .iter()
        .map(|s| {
            let mut row = vec![s.name.clone(), s.branch.clone(), format_port_pairs(&s.ports)];
            if all_namespaces {
                row.push(s.namespace.clone().unwrap_or_else(|| "-".to_string()));
            }
            row
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let title = if all_namespaces {
        "Running sandboxes".to_string()
    } else {
        format!("Running sandboxes ({namespace})")
    };
    writeln!(&mut out, "{}", title.bold()).unwrap();
    writeln!(&mut out, "{}", pad_row(headers.iter().copied(), &widths).dimmed()).unwrap();
    for row in &rows {
        writeln!(&mut out, "{}", pad_row(row.iter().map(String::as_str), &widths)).unwrap();
    }
    out
}

fn pad_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

pub async fn run(all_namespaces: bool) -> Result<()> {
    let manager = manager()?;
    let sandboxes = manager.list(all_namespaces).await?;
    print!(
        "{}",
        format_table(&sandboxes, &manager.project().namespace, all_namespaces)
    );
    Ok(())
}
