//! Analytic breakdown extraction (tabular dialect).
//!
//! Breakdown sheets list each composition's ingredients as flat
//! (parent code, child code, coefficient) rows. The parent code is only
//! written on the first ingredient row of each composition; following
//! rows leave it blank and carry the previous parent forward. Code
//! resolution to item ids happens later in the orchestrator.

use rust_decimal::Decimal;

use crate::classify::fold_text;
use crate::rows::parse_localized_decimal;
use crate::workbook::Cell;

/// One parent → child coefficient edge, by publisher code.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticLink {
    pub parent_code: String,
    pub child_code: String,
    pub coefficient: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct AnalyticLayout {
    header_row: usize,
    parent_col: usize,
    child_col: usize,
    coef_col: usize,
}

/// Extracts every link from a breakdown sheet. Returns an empty list
/// when the sheet has no recognizable header (the sheet is then simply
/// skipped, per the row-skip policy).
pub fn extract_links(rows: &[Vec<Cell>], scan_rows: usize) -> Vec<AnalyticLink> {
    let Some(layout) = locate_analytic_layout(rows, scan_rows) else {
        return Vec::new();
    };

    let mut links = Vec::new();
    let mut current_parent = String::new();

    for row in rows.iter().skip(layout.header_row + 1) {
        let parent_raw = row.get(layout.parent_col).map(strip_code).unwrap_or_default();
        let child = row.get(layout.child_col).map(strip_code).unwrap_or_default();

        // Blank parent code = same composition as the previous row.
        let parent = if parent_raw.is_empty() {
            current_parent.clone()
        } else {
            current_parent = parent_raw.clone();
            parent_raw
        };

        if parent.is_empty() || child.is_empty() {
            continue;
        }

        let coefficient = row
            .get(layout.coef_col)
            .and_then(|c| parse_localized_decimal(c.text()));
        let Some(coefficient) = coefficient else { continue };
        if coefficient <= Decimal::ZERO {
            continue;
        }

        links.push(AnalyticLink {
            parent_code: parent,
            child_code: child,
            coefficient,
        });
    }

    links
}

/// The breakdown header needs both a composition/item token and a
/// coefficient token; column headers wrap across lines, so newlines are
/// flattened before matching.
fn locate_analytic_layout(rows: &[Vec<Cell>], scan_rows: usize) -> Option<AnalyticLayout> {
    for (idx, row) in rows.iter().take(scan_rows).enumerate() {
        let headers: Vec<String> = row
            .iter()
            .map(|c| fold_text(c.text()).replace(['\n', '\r'], " "))
            .collect();
        let joined = headers.join(" ");
        if !(joined.contains("COMPOS") || joined.contains("ITEM")) {
            continue;
        }
        if !headers.iter().any(|h| h.contains("COEF")) {
            continue;
        }

        let mut parent_col = None;
        let mut child_col = None;
        let mut coef_col = None;
        let mut code_positions = Vec::new();

        for (col, header) in headers.iter().enumerate() {
            if header.contains("COEF") {
                coef_col = Some(col);
            }
            if header.contains("COD") {
                code_positions.push(col);
            }
            if header.contains("COMPOSICAO") && header.contains("CODIGO") {
                parent_col = Some(col);
            }
            if header.contains("ITEM") && header.contains("COMPOSICAO") {
                child_col = Some(col);
            } else if parent_col.is_none() && header.contains("COMP") && header.contains("COD") {
                parent_col = Some(col);
            } else if child_col.is_none() && header.contains("ITEM") && header.contains("COD") {
                child_col = Some(col);
            }
        }

        // Keyword match failed: take the first and second code-like columns.
        if parent_col.is_none() {
            parent_col = code_positions.first().copied();
        }
        if child_col.is_none() && code_positions.len() > 1 {
            child_col = Some(code_positions[1]);
        }

        if let (Some(parent_col), Some(child_col), Some(coef_col)) =
            (parent_col, child_col, coef_col)
        {
            return Some(AnalyticLayout {
                header_row: idx,
                parent_col,
                child_col,
                coef_col,
            });
        }
    }
    None
}

/// Removes formula punctuation from a code cell; the breakdown sheets
/// occasionally wrap codes the same way the catalog sheets do.
fn strip_code(cell: &Cell) -> String {
    let raw = cell.text().trim();
    let first = raw.split([';', ',']).next().unwrap_or("");
    first
        .replace("HYPERLINK", "")
        .replace(['=', '"', '(', ')'], "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn cell(text: &str) -> Cell {
        Cell {
            value: Some(text.to_string()),
            formula: None,
        }
    }

    fn row(texts: &[&str]) -> Vec<Cell> {
        texts.iter().map(|t| cell(t)).collect()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn extracts_links_with_parent_carry_forward() {
        let rows = vec![
            row(&["Relatório analítico"]),
            row(&["Código da\nComposição", "Código Item", "Coeficiente"]),
            row(&["87245", "1001", "2,0000"]),
            row(&["", "1002", "0,5000"]),
            row(&["90110", "1001", "1,0000"]),
        ];

        let links = extract_links(&rows, 80);
        assert_eq!(
            links,
            vec![
                AnalyticLink {
                    parent_code: "87245".into(),
                    child_code: "1001".into(),
                    coefficient: dec("2.0000"),
                },
                AnalyticLink {
                    parent_code: "87245".into(),
                    child_code: "1002".into(),
                    coefficient: dec("0.5000"),
                },
                AnalyticLink {
                    parent_code: "90110".into(),
                    child_code: "1001".into(),
                    coefficient: dec("1.0000"),
                },
            ]
        );
    }

    #[test]
    fn rows_without_child_or_positive_coefficient_are_skipped() {
        let rows = vec![
            row(&["Composição Código", "Item Código", "Coeficiente"]),
            row(&["87245", "", "2,0"]),
            row(&["87245", "1001", "0"]),
            row(&["87245", "1001", "abc"]),
            row(&["87245", "1002", "3,0"]),
        ];

        let links = extract_links(&rows, 80);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].child_code, "1002");
    }

    #[test]
    fn falls_back_to_code_like_columns() {
        let rows = vec![
            row(&["Item", "Código A", "Código B", "Coeficiente"]),
            row(&["x", "87245", "1001", "1,5"]),
        ];

        let links = extract_links(&rows, 80);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].parent_code, "87245");
        assert_eq!(links[0].child_code, "1001");
    }

    #[test]
    fn missing_header_yields_no_links() {
        let rows = vec![row(&["nada"]), row(&["87245", "1001", "1,0"])];
        assert!(extract_links(&rows, 80).is_empty());
    }
}
