//! End-to-end SICRO flow: synthetic catalog import (single-region
//! fallback), analytic report scan with on-the-fly item creation, and
//! the completeness gate leaving the catalog untouched on rejection.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cbase_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("cbase");
    path
}

fn run_cbase(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cbase_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cbase: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/custobase.sqlite"

[server]
bind = "127.0.0.1:7432"

[import]
lock_file = "{}/data/import.lock"
"#,
        root.display(),
        root.display()
    );

    let config_path = root.join("config").join("cbase.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn col_letter(idx: usize) -> char {
    (b'A' + idx as u8) as char
}

fn inline_row(r: usize, cells: &[(usize, &str)]) -> String {
    let mut out = format!("<row r=\"{}\">", r);
    for (col, text) in cells {
        out.push_str(&format!(
            "<c r=\"{}{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
            col_letter(*col),
            r,
            text
        ));
    }
    out.push_str("</row>");
    out
}

fn build_workbook(sheets: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();

        let mut workbook = String::from(
            "<?xml version=\"1.0\"?><workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets>",
        );
        let mut rels = String::from(
            "<?xml version=\"1.0\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        );
        for (i, (name, _)) in sheets.iter().enumerate() {
            workbook.push_str(&format!(
                "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
                name,
                i + 1,
                i + 1
            ));
            rels.push_str(&format!(
                "<Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet{}.xml\"/>",
                i + 1,
                i + 1
            ));
        }
        workbook.push_str("</sheets></workbook>");
        rels.push_str("</Relationships>");

        zip.start_file("xl/workbook.xml", options).unwrap();
        zip.write_all(workbook.as_bytes()).unwrap();
        zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        zip.write_all(rels.as_bytes()).unwrap();

        for (i, (_, body)) in sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><worksheet><sheetData>{}</sheetData></worksheet>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// SICRO synthetic report: one composition row, single cost column,
/// region supplied by the caller.
fn build_sicro_synthetic(root: &Path) -> PathBuf {
    let body = format!(
        "{}{}",
        inline_row(
            1,
            &[
                (0, "Código"),
                (1, "Descrição"),
                (2, "Unidade"),
                (3, "Custo Unitário"),
            ],
        ),
        inline_row(
            2,
            &[
                (0, "0307731"),
                (1, "ESCAVAÇÃO MECÂNICA DE VALA EM MATERIAL DE 1A CATEGORIA"),
                (2, "M3"),
                (3, "847,10"),
            ],
        ),
    );
    let xlsx = build_workbook(&[("Composições", body)]);
    let path = root.join("SICRO_RS_202407.xlsx");
    fs::write(&path, xlsx).unwrap();
    path
}

/// SICRO analytic composition report, optionally without the material
/// section (to trip the completeness gate).
fn build_sicro_analytic(root: &Path, with_material: bool) -> PathBuf {
    let mut rows = vec![
        inline_row(
            1,
            &[
                (0, "0307731"),
                (1, "ESCAVAÇÃO MECÂNICA DE VALA EM MATERIAL DE 1A CATEGORIA"),
            ],
        ),
        inline_row(2, &[(1, "Produção da equipe"), (7, "35,00"), (8, "m3")]),
        inline_row(3, &[(0, "A - EQUIPAMENTOS")]),
        inline_row(
            4,
            &[
                (0, "E9524"),
                (1, "ESCAVADEIRA HIDRÁULICA SOBRE ESTEIRAS"),
                (2, "1,0"),
                (3, "h"),
            ],
        ),
        inline_row(5, &[(0, "B - MÃO DE OBRA")]),
        inline_row(6, &[(0, "T701"), (1, "SERVENTE"), (2, "2,0"), (3, "h")]),
    ];
    let mut next = 7;
    if with_material {
        rows.push(inline_row(next, &[(0, "C - MATERIAL")]));
        rows.push(inline_row(
            next + 1,
            &[(0, "M0305"), (1, "AREIA MEDIA"), (2, "0,25"), (3, "m3")],
        ));
        next += 2;
    }
    rows.push(inline_row(next, &[(0, "CUSTO TOTAL"), (2, "847,10")]));

    let xlsx = build_workbook(&[("RS Analitico", rows.concat())]);
    let name = if with_material {
        "RS_202407_analitico.xlsx"
    } else {
        "RS_202407_analitico_incompleto.xlsx"
    };
    let path = root.join(name);
    fs::write(&path, xlsx).unwrap();
    path
}

fn seed_synthetic(tmp: &TempDir, config_path: &Path) {
    run_cbase(config_path, &["init"]);
    let synthetic = build_sicro_synthetic(tmp.path());
    let (stdout, stderr, success) = run_cbase(
        config_path,
        &[
            "import",
            synthetic.to_str().unwrap(),
            "--source",
            "SICRO",
            "--region",
            "RS",
            "--progress",
            "off",
        ],
    );
    assert!(success, "synthetic import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("items created: 1"), "{}", stdout);
    assert!(stdout.contains("prices inserted: 1"), "{}", stdout);
}

#[test]
fn analytic_import_builds_the_composition_graph() {
    let (tmp, config_path) = setup_test_env();
    seed_synthetic(&tmp, &config_path);

    let report = build_sicro_analytic(tmp.path(), true);
    let (stdout, stderr, success) = run_cbase(
        &config_path,
        &[
            "import",
            report.to_str().unwrap(),
            "--source",
            "SICRO",
            "--dialect",
            "analytic",
            "--region",
            "RS",
            "--progress",
            "off",
        ],
    );
    assert!(success, "analytic import failed: {} {}", stdout, stderr);
    assert!(stdout.contains("compositions: 1"), "{}", stdout);
    assert!(stdout.contains("items created: 3"), "{}", stdout);
    assert!(stdout.contains("crew links: 2"), "{}", stdout);
    assert!(stdout.contains("material links: 1"), "{}", stdout);

    let (breakdown, stderr, success) = run_cbase(
        &config_path,
        &["composition", "0307731", "--source", "SICRO"],
    );
    assert!(success, "composition failed: {}", stderr);
    assert!(breakdown.contains("production: 35.00 m3/h"), "{}", breakdown);
    assert!(breakdown.contains("E9524"), "{}", breakdown);
    assert!(breakdown.contains("SERVENTE"), "{}", breakdown);
    assert!(breakdown.contains("M0305"), "{}", breakdown);
}

#[test]
fn analytic_rerun_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    seed_synthetic(&tmp, &config_path);

    let report = build_sicro_analytic(tmp.path(), true);
    let args = [
        "import",
        report.to_str().unwrap(),
        "--source",
        "SICRO",
        "--dialect",
        "analytic",
        "--progress",
        "off",
    ];
    run_cbase(&config_path, &args);
    let (stdout, stderr, success) = run_cbase(&config_path, &args);
    assert!(success, "re-run failed: {}", stderr);
    // Members already exist; the graph is replaced, not duplicated.
    assert!(stdout.contains("items created: 0"), "{}", stdout);
    assert!(stdout.contains("crew links: 2"), "{}", stdout);
    assert!(stdout.contains("material links: 1"), "{}", stdout);
}

#[test]
fn completeness_gate_rejects_and_leaves_catalog_unchanged() {
    let (tmp, config_path) = setup_test_env();
    seed_synthetic(&tmp, &config_path);

    let incomplete = build_sicro_analytic(tmp.path(), false);
    let (stdout, stderr, success) = run_cbase(
        &config_path,
        &[
            "import",
            incomplete.to_str().unwrap(),
            "--source",
            "SICRO",
            "--dialect",
            "analytic",
            "--progress",
            "off",
        ],
    );
    assert!(!success, "import should fail: {}", stdout);
    assert!(stderr.contains("incomplete import"), "stderr: {}", stderr);

    // No crew members were created by the rejected run.
    let (sources_out, _, _) = run_cbase(&config_path, &["sources"]);
    assert!(sources_out.contains("1 items"), "{}", sources_out);

    // The complete report then imports cleanly.
    let report = build_sicro_analytic(tmp.path(), true);
    let (stdout, _, success) = run_cbase(
        &config_path,
        &[
            "import",
            report.to_str().unwrap(),
            "--source",
            "SICRO",
            "--dialect",
            "analytic",
            "--progress",
            "off",
        ],
    );
    assert!(success, "{}", stdout);

    let (sources_out, _, _) = run_cbase(&config_path, &["sources"]);
    assert!(sources_out.contains("4 items"), "{}", sources_out);
}
