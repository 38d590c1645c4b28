use calamine::{open_workbook_auto, DataType, Reader};
use cbr_stats::importers::{LayoutRecipe, SheetParser, SourceFile};
use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: examine-sheet <file.xlsx> [sheet] [recipe]");
        std::process::exit(2);
    }
    let file_path = &args[1];

    println!("Opening workbook: {file_path}");
    let mut workbook = open_workbook_auto(file_path)?;

    println!("\nSheet names:");
    let sheet_names = workbook.sheet_names();
    for (i, name) in sheet_names.iter().enumerate() {
        println!("  {i}: {name}");
    }

    let sheet_name = match args.get(2) {
        Some(name) => name.clone(),
        None => sheet_names.first().cloned().ok_or("workbook has no sheets")?,
    };

    println!("\n\nExamining sheet: {sheet_name}");
    println!("{}", "=".repeat(100));

    let range = workbook.worksheet_range(&sheet_name)?;
    println!("Dimensions: {:?}, starting at {:?}", range.get_size(), range.start());
    println!("\nFirst 30 rows (showing first 8 columns):");
    println!("{}", "=".repeat(100));

    let first_row = range.start().map_or(0, |(row, _)| row as usize);
    for (row_idx, row) in range.rows().enumerate().take(30) {
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        print!("Row {:3}: ", first_row + row_idx + 1);
        for cell in row.iter().take(8) {
            if cell.is_empty() {
                print!("[empty] ");
            } else {
                print!("[{cell}] ");
            }
        }
        println!();
    }

    // What the layout recipe makes of the whole file
    let recipe = LayoutRecipe::resolve(args.get(3).map_or("escrow", String::as_str))?;
    let parser = SheetParser::new(recipe)?;
    let source = SourceFile::from_path(file_path)?;

    println!("\n{}", "=".repeat(100));
    println!("Recipe '{}':", parser.recipe().name);
    println!("{}", "=".repeat(100));

    match parser.header_indicators(&source) {
        Ok(indicators) => {
            println!("Indicators in header order:");
            for (i, name) in indicators.iter().enumerate() {
                println!("  {:2}: {name}", i + 1);
            }
        }
        Err(e) => println!("Header row not readable: {e}"),
    }

    match parser.parse_source(&source) {
        Ok(records) => {
            println!("\n{} records", records.len());
            for record in records.iter().take(10) {
                println!(
                    "  {} | {} | {} | {}",
                    record.entity, record.indicator, record.period, record.value
                );
            }
        }
        Err(e) => println!("\nFile would be skipped: {e}"),
    }

    Ok(())
}
