//! Test fixture generator for office-to-pdf.
//!
//! Builds a small source folder that exercises the batch engine:
//! a Word/Excel pair sharing the stem `report`, a nested folder for
//! folder-structure mirroring, a multi-sheet workbook, an Office lock
//! file, a corrupt document and a document with a very long name.
//!
//! Run from the workspace root: `cargo run -p fixture-generator`

use anyhow::Result;
use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};
use rust_xlsxwriter::{Format, Workbook};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

fn main() -> Result<()> {
    let source_dir = Path::new("tests/fixtures/source");
    fs::create_dir_all(source_dir.join("minutes/2024"))?;

    println!("Generating test fixtures...\n");

    // Word documents
    write_docx(
        &source_dir.join("report.docx"),
        "Quarterly Report",
        &["Revenue grew in every region.", "Costs were flat."],
    )?;
    write_docx(
        &source_dir.join("memo.docx"),
        "Memo",
        &["Please review the attached figures before Friday."],
    )?;
    write_docx(
        &source_dir.join("minutes/2024/board.docx"),
        "Board Minutes",
        &["Attendance: all members present.", "Motion carried."],
    )?;
    generate_table_docx(&source_dir.join("minutes/attendance.docx"))?;
    generate_long_name_docx(source_dir)?;

    // Excel workbooks
    generate_report_xlsx(&source_dir.join("report.xlsx"))?;
    generate_multisheet_xlsx(&source_dir.join("budget.xlsx"))?;

    // Files the engine must ignore or survive
    generate_lock_file(&source_dir.join("~$report.docx"))?;
    generate_corrupt_docx(&source_dir.join("corrupt.docx"))?;

    println!("\nAll fixtures generated successfully!");
    Ok(())
}

/// A heading followed by plain paragraphs.
fn write_docx(path: &Path, title: &str, paragraphs: &[&str]) -> Result<()> {
    println!("  Creating: {}", path.display());

    let mut docx = Docx::new().add_paragraph(
        Paragraph::new().add_run(Run::new().add_text(title).bold().size(36)),
    );
    for text in paragraphs {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)));
    }

    let file = File::create(path)?;
    docx.build().pack(file)?;
    Ok(())
}

fn generate_table_docx(path: &Path) -> Result<()> {
    println!("  Creating: {}", path.display());

    let rows = [("Member", "Present"), ("A. Chair", "yes"), ("B. Treasurer", "no")];
    let table = Table::new(
        rows.iter()
            .map(|(name, present)| {
                TableRow::new(vec![
                    TableCell::new()
                        .add_paragraph(Paragraph::new().add_run(Run::new().add_text(*name))),
                    TableCell::new()
                        .add_paragraph(Paragraph::new().add_run(Run::new().add_text(*present))),
                ])
            })
            .collect(),
    );

    let docx = Docx::new()
        .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Attendance").bold()))
        .add_table(table);
    let file = File::create(path)?;
    docx.build().pack(file)?;
    Ok(())
}

/// A file name long enough to need truncation under a tight path limit.
fn generate_long_name_docx(source_dir: &Path) -> Result<()> {
    let name = format!("{}.docx", "annual_financial_statement_".repeat(8));
    write_docx(
        &source_dir.join(name),
        "Annual Financial Statement",
        &["This document has an unusually long file name."],
    )
}

/// Shares the stem of `report.docx` so both PDFs need distinct names.
fn generate_report_xlsx(path: &Path) -> Result<()> {
    println!("  Creating: {}", path.display());

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let bold = Format::new().set_bold();

    worksheet.write_string_with_format(0, 0, "Region", &bold)?;
    worksheet.write_string_with_format(0, 1, "Revenue", &bold)?;
    let data = [("North", 120_000.0), ("South", 95_500.0), ("West", 143_250.0)];
    for (row, (region, revenue)) in data.iter().enumerate() {
        let r = (row + 1) as u32;
        worksheet.write_string(r, 0, *region)?;
        worksheet.write_number(r, 1, *revenue)?;
    }

    workbook.save(path)?;
    Ok(())
}

/// Several sheets; some backends write one PDF per sheet.
fn generate_multisheet_xlsx(path: &Path) -> Result<()> {
    println!("  Creating: {}", path.display());

    let mut workbook = Workbook::new();
    for (name, amounts) in [
        ("Q1", [5000.0, 800.0, 25000.0]),
        ("Q2", [5100.0, 750.0, 25500.0]),
        ("Q3", [5200.0, 900.0, 26000.0]),
    ] {
        let sheet = workbook.add_worksheet().set_name(name)?;
        sheet.write_string(0, 0, "Category")?;
        sheet.write_string(0, 1, "Amount")?;
        for (i, (category, amount)) in ["Rent", "Utilities", "Salaries"]
            .iter()
            .zip(amounts.iter())
            .enumerate()
        {
            let row = (i + 1) as u32;
            sheet.write_string(row, 0, *category)?;
            sheet.write_number(row, 1, *amount)?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Office writes `~$name` owner files next to open documents.
fn generate_lock_file(path: &Path) -> Result<()> {
    println!("  Creating: {}", path.display());

    let mut file = File::create(path)?;
    file.write_all(b"owner lock")?;
    Ok(())
}

/// Not a ZIP container, so any backend must refuse to open it.
fn generate_corrupt_docx(path: &Path) -> Result<()> {
    println!("  Creating: {}", path.display());

    let mut file = File::create(path)?;
    file.write_all(b"This is not a valid DOCX file. It's just garbage data.")?;
    Ok(())
}
