#![allow(dead_code)]

use rust_xlsxwriter::Workbook;

/// One data row of an escrow-style sheet: code, region, values per indicator
pub struct Row<'a> {
    pub code: &'a str,
    pub region: &'a str,
    pub values: Vec<Option<f64>>,
}

pub fn row<'a>(code: &'a str, region: &'a str, values: &[Option<f64>]) -> Row<'a> {
    Row {
        code,
        region,
        values: values.to_vec(),
    }
}

/// Workbook laid out like the regional escrow files: three title rows, the
/// header in row 4, codes in column A, regions in column B, values from C
pub fn escrow_workbook(indicators: &[&str], rows: &[Row]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    sheet
        .write_string(0, 0, "Сведения о средствах на счетах эскроу")
        .unwrap();
    sheet.write_string(1, 0, "млн руб.").unwrap();

    sheet.write_string(3, 0, "Код").unwrap();
    sheet.write_string(3, 1, "Регион").unwrap();
    for (i, indicator) in indicators.iter().enumerate() {
        sheet.write_string(3, 2 + i as u16, *indicator).unwrap();
    }

    for (r, data) in rows.iter().enumerate() {
        let row_num = 4 + r as u32;
        if !data.code.is_empty() {
            sheet.write_string(row_num, 0, data.code).unwrap();
        }
        if !data.region.is_empty() {
            sheet.write_string(row_num, 1, data.region).unwrap();
        }
        for (i, value) in data.values.iter().enumerate() {
            if let Some(v) = value {
                sheet.write_number(row_num, 2 + i as u16, *v).unwrap();
            }
        }
    }

    workbook.save_to_buffer().unwrap()
}

/// One sheet of a sheet-per-period workbook: header row at A1, then entity + values rows
pub struct PeriodSheet<'a> {
    pub name: &'a str,
    pub header: Vec<&'a str>,
    pub rows: Vec<(&'a str, Vec<f64>)>,
}

pub fn sheet_per_period_workbook(sheets: &[PeriodSheet]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for period_sheet in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(period_sheet.name).unwrap();
        for (col, text) in period_sheet.header.iter().enumerate() {
            sheet.write_string(0, col as u16, *text).unwrap();
        }
        for (r, (entity, values)) in period_sheet.rows.iter().enumerate() {
            sheet.write_string(1 + r as u32, 0, *entity).unwrap();
            for (col, value) in values.iter().enumerate() {
                sheet.write_number(1 + r as u32, 1 + col as u16, *value).unwrap();
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

pub const VOLUME: &str = "Объем средств на счетах эскроу";
pub const ACCOUNTS: &str = "Количество счетов эскроу";
