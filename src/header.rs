//! Header and column location for catalog sheets.
//!
//! Publishers float the header anywhere in the first dozens of rows and
//! move price columns around between releases, so nothing is addressed
//! by fixed position: the header row is found by token match and each
//! column by keyword, with positional defaults as a last resort.

use std::collections::HashMap;

use crate::classify::{fold_text, region_from_filename, REGIONS};
use crate::workbook::Cell;

/// Resolved layout of one catalog sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderLayout {
    pub header_row: usize,
    pub code_col: usize,
    pub desc_col: usize,
    pub unit_col: usize,
    /// Region → price column. Multi-region sheets carry one column per
    /// UF; single-region sheets map the inferred UF to the sole
    /// price/cost column.
    pub region_cols: Vec<(String, usize)>,
}

/// Why a sheet contributed no layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutSkip {
    /// No row with both a code and a description token.
    NoHeaderRow,
    /// Header found but no price column could be tied to a region.
    NoRegionColumns,
    /// An explicit region filter matched none of the sheet's columns.
    FilterUnmatched,
}

/// Locates the header row and maps its columns.
///
/// `region_filter` narrows multi-region sheets to one column and, with
/// the filename, doubles as the region hint for single-region sheets.
pub fn locate_layout(
    rows: &[Vec<Cell>],
    scan_rows: usize,
    region_filter: Option<&str>,
    filename: &str,
) -> Result<HeaderLayout, LayoutSkip> {
    let header_row = find_header_row(rows, scan_rows).ok_or(LayoutSkip::NoHeaderRow)?;

    let mut found: HashMap<String, usize> = HashMap::new();
    for row in rows.iter().take(header_row + 1) {
        for (col, cell) in row.iter().enumerate() {
            let token = fold_text(cell.text().trim());
            if REGIONS.contains(&token.as_str()) {
                found.insert(token, col);
            }
        }
    }

    // Single-region fallback: the workbook quotes one UF named by the
    // caller or the filename, with a lone price/cost column.
    if found.is_empty() {
        let region = region_filter
            .map(|r| r.to_string())
            .or_else(|| region_from_filename(filename));
        if let Some(region) = region {
            let price_col = rows[header_row].iter().position(|cell| {
                let v = fold_text(cell.text());
                v.contains("PRECO") || v.contains("CUSTO")
            });
            if let Some(col) = price_col {
                found.insert(region, col);
            }
        }
        if found.is_empty() {
            return Err(LayoutSkip::NoRegionColumns);
        }
    }

    if let Some(filter) = region_filter {
        if filter != "ALL" {
            match found.get(filter).copied() {
                Some(col) => {
                    found.clear();
                    found.insert(filter.to_string(), col);
                }
                None => return Err(LayoutSkip::FilterUnmatched),
            }
        }
    }

    let (code_col, desc_col, unit_col) = field_columns(&rows[header_row]);

    let mut region_cols: Vec<(String, usize)> = found.into_iter().collect();
    region_cols.sort_by(|a, b| a.1.cmp(&b.1));

    Ok(HeaderLayout {
        header_row,
        code_col,
        desc_col,
        unit_col,
        region_cols,
    })
}

/// First row within the scan window holding both a code and a
/// description token.
pub fn find_header_row(rows: &[Vec<Cell>], scan_rows: usize) -> Option<usize> {
    rows.iter().take(scan_rows).position(|row| {
        let joined = fold_text(
            &row.iter()
                .map(|c| c.text())
                .collect::<Vec<_>>()
                .join(" "),
        );
        joined.contains("CODIGO") && joined.contains("DESCRICAO")
    })
}

fn field_columns(header: &[Cell]) -> (usize, usize, usize) {
    let mut code_col = None;
    let mut desc_col = None;
    let mut unit_col = None;
    for (idx, cell) in header.iter().enumerate() {
        let v = fold_text(cell.text().trim());
        if v.contains("CODIGO") && code_col.is_none() {
            code_col = Some(idx);
        } else if v.contains("DESCRICAO") && desc_col.is_none() {
            desc_col = Some(idx);
        } else if v.contains("UNIDADE") && unit_col.is_none() {
            unit_col = Some(idx);
        }
    }
    // Positional defaults observed across every published layout.
    (
        code_col.unwrap_or(1),
        desc_col.unwrap_or(2),
        unit_col.unwrap_or(3),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(text: &str) -> Cell {
        Cell {
            value: Some(text.to_string()),
            formula: None,
        }
    }

    fn row(texts: &[&str]) -> Vec<Cell> {
        texts.iter().map(|t| cell(t)).collect()
    }

    #[test]
    fn finds_floating_header_and_region_columns() {
        let rows = vec![
            row(&["SINAPI - relatório"]),
            row(&["", "", "", "", "SP", "RJ"]),
            row(&["", "Código", "Descrição", "Unidade", "Preço SP", "Preço RJ"]),
            row(&["", "1001", "Cimento", "KG", "1,23", "1,45"]),
        ];

        let layout = locate_layout(&rows, 50, None, "SINAPI_202407.xlsx").unwrap();
        assert_eq!(layout.header_row, 2);
        assert_eq!(layout.code_col, 1);
        assert_eq!(layout.desc_col, 2);
        assert_eq!(layout.unit_col, 3);
        assert_eq!(
            layout.region_cols,
            vec![("SP".to_string(), 4), ("RJ".to_string(), 5)]
        );
    }

    #[test]
    fn single_region_falls_back_to_filename() {
        let rows = vec![
            row(&["Código", "Descrição", "Unidade", "Custo unitário"]),
            row(&["1001", "Cimento", "KG", "1,23"]),
        ];

        let layout = locate_layout(&rows, 50, None, "SICRO RS 202407.xlsx").unwrap();
        assert_eq!(layout.region_cols, vec![("RS".to_string(), 3)]);
        assert_eq!(layout.code_col, 0);
    }

    #[test]
    fn explicit_filter_narrows_columns() {
        let rows = vec![row(&["Código", "Descrição", "Unidade", "SP", "RJ"])];

        let layout = locate_layout(&rows, 50, Some("RJ"), "arquivo.xlsx").unwrap();
        assert_eq!(layout.region_cols, vec![("RJ".to_string(), 4)]);

        assert_eq!(
            locate_layout(&rows, 50, Some("AC"), "arquivo.xlsx"),
            Err(LayoutSkip::FilterUnmatched)
        );
    }

    #[test]
    fn missing_header_is_reported() {
        let rows = vec![row(&["nada", "aqui"]), row(&["ainda", "nada"])];
        assert_eq!(
            locate_layout(&rows, 50, None, "arquivo.xlsx"),
            Err(LayoutSkip::NoHeaderRow)
        );
    }

    #[test]
    fn header_beyond_scan_window_is_missed() {
        let mut rows = vec![row(&[""]); 60];
        rows.push(row(&["Código", "Descrição"]));
        assert_eq!(find_header_row(&rows, 50), None);
    }
}
