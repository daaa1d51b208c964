//! Text renderings of a planned tree for `list` and `tree`.

use crate::drs::tree::DrsTree;
use crate::drs::Command;

/// Human-readable byte count, decimal units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// One row per dataset: key, latest, direction, target, files, size.
pub fn list_table(tree: &DrsTree) -> Vec<String> {
    let removing = tree.command() == Command::Remove;
    let header = if removing {
        ["Publication level", "Latest", "", "Remove", "Files", ""]
    } else {
        ["Publication level", "Latest", "", "Upgrade", "Files", "Total size"]
    };

    let mut rows: Vec<[String; 6]> = Vec::new();
    for state in tree.datasets() {
        let latest = state
            .latest_version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "Initial".to_string());
        let size = if removing {
            String::new()
        } else {
            format_size(state.files.iter().map(|f| f.size).sum())
        };
        rows.push([
            state.key.to_string(),
            latest,
            if removing { "<-" } else { "->" }.to_string(),
            state.upgrade_version.to_string(),
            state.files.len().to_string(),
            size,
        ]);
    }

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let format_row = |cells: [&str; 6]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(header)];
    lines.push("-".repeat(lines[0].len()));
    for row in &rows {
        lines.push(format_row([
            &row[0], &row[1], &row[2], &row[3], &row[4], &row[5],
        ]));
    }
    lines
}

/// Box-drawing rendering of the whole tree.
pub fn render_tree(tree: &DrsTree) -> Vec<String> {
    let mut lines = vec![tree.root_id().to_string()];
    if let Some(root) = tree.node(tree.root_id()) {
        render_children(tree, &root.children, "", &mut lines);
    }
    lines
}

fn render_children(tree: &DrsTree, children: &[String], prefix: &str, lines: &mut Vec<String>) {
    for (index, id) in children.iter().enumerate() {
        let Some(node) = tree.node(id) else {
            continue;
        };
        let last = index + 1 == children.len();
        let (branch, extension) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        lines.push(format!("{}{}{}", prefix, branch, node.tag));
        render_children(tree, &node.children, &format!("{}{}", prefix, extension), lines);
    }
}
