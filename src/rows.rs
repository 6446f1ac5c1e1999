//! Data-row extraction and code normalization.
//!
//! Catalog rows are noisy: codes arrive wrapped in HYPERLINK/MATCH
//! formulas, group labels sit between data rows, and prices use
//! localized formatting (`R$ 1.234,56`). Extraction recovers the clean
//! code, keeps rows without a parseable price as catalog entries, and
//! silently counts what it drops.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::classify::fold_text;
use crate::header::HeaderLayout;
use crate::workbook::Cell;

static HYPERLINK_SEMI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r";(\d{4,6})\)").unwrap());
static HYPERLINK_COMMA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\d{4,6})\)").unwrap());
static MATCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"MATCH\((\d{4,6})").unwrap());

/// One extracted catalog row: code, description, unit, and whatever
/// region prices parsed. A valid code with zero parseable prices is
/// still a catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub prices: BTreeMap<String, Decimal>,
}

/// Per-sheet extraction counters surfaced in the import summary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtractionStats {
    pub rows_kept: usize,
    pub rows_skipped: usize,
    pub prices_unparseable: usize,
}

/// Recovers the item code from a cell, unwrapping spreadsheet-formula
/// artifacts. The publishers wrap codes as
/// `=HYPERLINK("#...";92539)` or `=HYPERLINK(...MATCH(92539...)`.
pub fn extract_code(cell: &Cell) -> String {
    for candidate in [cell.formula.as_deref(), cell.value.as_deref()]
        .into_iter()
        .flatten()
    {
        if candidate.contains("HYPERLINK") {
            if let Some(caps) = HYPERLINK_SEMI_RE
                .captures(candidate)
                .or_else(|| HYPERLINK_COMMA_RE.captures(candidate))
            {
                return caps[1].to_string();
            }
            if candidate.contains("MATCH") {
                if let Some(caps) = MATCH_RE.captures(candidate) {
                    return caps[1].to_string();
                }
            }
        }
    }
    normalize_numeric_code(cell.text().trim())
}

/// Excel stores integer codes as floats; "92539.0" and "92539" are the
/// same code.
fn normalize_numeric_code(raw: &str) -> String {
    if let Some(stripped) = raw.strip_suffix(".0") {
        if stripped.chars().all(|c| c.is_ascii_digit()) && !stripped.is_empty() {
            return stripped.to_string();
        }
    }
    raw.to_string()
}

/// True for codes that are really group labels or empty filler.
pub fn is_garbage_code(code: &str) -> bool {
    if code.is_empty() || code == "0" {
        return true;
    }
    let folded = fold_text(code);
    folded.starts_with("COD") || folded.contains("GRUPO")
}

/// Parses a localized decimal: `R$` prefix, dot thousands separator,
/// comma decimal separator. Plain dot-decimal numbers (how numeric
/// cells serialize) parse too. `None` means "no price", never an error.
pub fn parse_localized_decimal(raw: &str) -> Option<Decimal> {
    let mut text = raw.trim().replace("R$", "");
    text.retain(|c| !c.is_whitespace());
    if text.is_empty() {
        return None;
    }

    let commas = text.matches(',').count();
    let normalized = if commas == 1 {
        // Comma is the decimal separator; dots are thousands.
        text.replace('.', "").replace(',', ".")
    } else if commas == 0 {
        text
    } else {
        return None;
    };

    normalized.parse::<Decimal>().ok()
}

/// Extracts all data rows below the header according to the layout.
pub fn extract_rows(
    rows: &[Vec<Cell>],
    layout: &HeaderLayout,
) -> (Vec<CatalogRow>, ExtractionStats) {
    let mut out = Vec::new();
    let mut stats = ExtractionStats::default();

    for row in rows.iter().skip(layout.header_row + 1) {
        let code = match row.get(layout.code_col) {
            Some(cell) => extract_code(cell),
            None => {
                stats.rows_skipped += 1;
                continue;
            }
        };
        if is_garbage_code(&code) {
            stats.rows_skipped += 1;
            continue;
        }

        let description = row
            .get(layout.desc_col)
            .map(|c| c.text().trim().to_string())
            .unwrap_or_default();
        let unit = row
            .get(layout.unit_col)
            .map(|c| c.text().trim().to_string())
            .unwrap_or_default();

        let mut prices = BTreeMap::new();
        for (region, col) in &layout.region_cols {
            let Some(cell) = row.get(*col) else { continue };
            if cell.is_empty() {
                continue;
            }
            match parse_localized_decimal(cell.text()) {
                Some(price) if price >= Decimal::ZERO => {
                    prices.insert(region.clone(), price);
                }
                Some(_) => {}
                None => stats.prices_unparseable += 1,
            }
        }

        stats.rows_kept += 1;
        out.push(CatalogRow {
            code,
            description,
            unit,
            prices,
        });
    }

    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn cell(text: &str) -> Cell {
        Cell {
            value: Some(text.to_string()),
            formula: None,
        }
    }

    fn formula_cell(formula: &str, cached: &str) -> Cell {
        Cell {
            value: Some(cached.to_string()),
            formula: Some(formula.to_string()),
        }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn unwraps_hyperlink_codes() {
        let c = formula_cell("HYPERLINK(\"#BUSCA!A1\";92539)", "92539");
        assert_eq!(extract_code(&c), "92539");

        let c = formula_cell("HYPERLINK(\"#BUSCA!A1\",88316)", "88316");
        assert_eq!(extract_code(&c), "88316");

        let c = formula_cell("HYPERLINK(CONCAT(X, MATCH(74209, B:B)))", "74209");
        assert_eq!(extract_code(&c), "74209");
    }

    #[test]
    fn plain_codes_pass_through() {
        assert_eq!(extract_code(&cell("  88316 ")), "88316");
        assert_eq!(extract_code(&cell("88316.0")), "88316");
        assert_eq!(extract_code(&cell("COMP-001")), "COMP-001");
    }

    #[test]
    fn garbage_codes_are_rejected() {
        assert!(is_garbage_code(""));
        assert!(is_garbage_code("0"));
        assert!(is_garbage_code("Código"));
        assert!(is_garbage_code("GRUPO 12"));
        assert!(!is_garbage_code("88316"));
    }

    #[test]
    fn localized_decimals_parse() {
        assert_eq!(parse_localized_decimal("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_localized_decimal("R$ 12,30"), Some(dec("12.30")));
        assert_eq!(parse_localized_decimal("1234.56"), Some(dec("1234.56")));
        assert_eq!(parse_localized_decimal("847"), Some(dec("847")));
        assert_eq!(parse_localized_decimal(""), None);
        assert_eq!(parse_localized_decimal("n/d"), None);
    }

    #[test]
    fn rows_without_price_are_still_entries() {
        let layout = HeaderLayout {
            header_row: 0,
            code_col: 0,
            desc_col: 1,
            unit_col: 2,
            region_cols: vec![("SP".to_string(), 3)],
        };
        let rows = vec![
            vec![cell("Código"), cell("Descrição"), cell("Unidade"), cell("SP")],
            vec![cell("1001"), cell("Cimento"), cell("KG"), cell("2,50")],
            vec![cell("1002"), cell("Areia"), cell("M3"), cell("indisponível")],
            vec![cell("GRUPO A"), cell(""), cell(""), cell("")],
        ];

        let (out, stats) = extract_rows(&rows, &layout);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].prices.get("SP"), Some(&dec("2.50")));
        assert!(out[1].prices.is_empty());
        assert_eq!(stats.rows_kept, 2);
        assert_eq!(stats.rows_skipped, 1);
        assert_eq!(stats.prices_unparseable, 1);
    }
}
