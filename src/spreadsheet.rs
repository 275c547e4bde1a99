use anyhow::{anyhow, Context};
use brk_types::product::{derive_description, derive_name, derive_sku, Product};
use calamine::{Data, Reader, Xlsx};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::Cursor;
use std::str::FromStr;

/// Semantic spreadsheet columns. Headers are matched against these by
/// keyword, not by position, so supplier files with reordered or slightly
/// renamed columns still import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CodigoBrk,
    RefBrk,
    Subgrupo,
    Posicion,
    RefFmsiOem,
    Marca,
    Linea,
    Modelo,
    Version,
    Precio,
    Stock,
    LargoMm,
    AnchoMm,
    EspesorMm,
    DiametroAMm,
    AltoBMm,
    EspesorCMm,
    EspesorMinMm,
    Agujeros,
    DiametroInternoAMm,
    DiametroOrificioCentralCMm,
    AlturaTotalDMm,
    Agujeros4,
    DiametroInternoMaximo,
    Diametro,
    Largo,
    XJuegoPastilla,
    LargoMm10,
}

/// Case-, accent- and whitespace-insensitive canonical form of a header.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(fold_accent)
        .flat_map(char::to_uppercase)
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'Á' | 'À' | 'Â' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ñ' | 'Ñ' => 'n',
        _ => c,
    }
}

/// Keyword rules for one normalized header. Most specific rules first:
/// `LARGO (mm)10` must win over `LARGO (mm)`, `ESPESOR MIN` over
/// `ESPESOR mm`, `DIÁMETRO INTERNO` over `DIÁMETRO (A)`.
pub fn map_header(normalized: &str) -> Option<Field> {
    use Field::*;
    let n = normalized;
    let field = if n.contains("CODIGO") && n.contains("BRK") {
        CodigoBrk
    } else if n == "REFBRK" || (n.contains("REF") && n.contains("BRK")) {
        RefBrk
    } else if n == "SUBGRUPO" {
        Subgrupo
    } else if n == "POSICION" {
        Posicion
    } else if n.contains("FMSI") || n.contains("OEM") {
        RefFmsiOem
    } else if n == "MARCA" {
        Marca
    } else if n == "LINEA" {
        Linea
    } else if n == "MODELO" {
        Modelo
    } else if n == "VERSION" {
        Version
    } else if n == "PRECIO" {
        Precio
    } else if n == "STOCK" {
        Stock
    } else if n.contains("LARGO") && n.contains("MM") && n.contains("10") {
        LargoMm10
    } else if n.contains("LARGO") && n.contains("MM") {
        LargoMm
    } else if n.contains("ANCHO") && n.contains("MM") {
        AnchoMm
    } else if n.contains("ESPESOR") && n.contains("MIN") {
        EspesorMinMm
    } else if n.contains("ESPESOR") && n.contains("(C)") {
        EspesorCMm
    } else if n.contains("ESPESOR") && n.contains("MM") {
        EspesorMm
    } else if n.contains("DIAMETROINTERNOMAXIMO") {
        DiametroInternoMaximo
    } else if n.contains("DIAMETROORIFICIOCENTRAL") {
        DiametroOrificioCentralCMm
    } else if n.contains("DIAMETROINTERNO") {
        DiametroInternoAMm
    } else if n.contains("DIAMETRO") && n.contains("(A)") {
        DiametroAMm
    } else if n.contains("ALTO") && n.contains("(B)") {
        AltoBMm
    } else if n.contains("ALTURATOTAL") {
        AlturaTotalDMm
    } else if n == "AGUJEROS" {
        Agujeros
    } else if n == "AGUJEROS4" {
        Agujeros4
    } else if n.contains("XJUEGOPASTILLA") {
        XJuegoPastilla
    } else if n == "DIAMETRO" {
        Diametro
    } else if n == "LARGO" {
        Largo
    } else {
        return None;
    };
    Some(field)
}

fn build_header_map(headers: &[String]) -> HashMap<Field, usize> {
    let mut map = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(field) = map_header(&normalize_header(header)) {
            map.insert(field, idx);
        }
    }
    map
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

/// Blank or unparseable numeric cells become `None`, never 0. A literal
/// `0` stays `Some(0.0)` — "measured as zero" is not "unspecified".
fn parse_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s).ok()
}

fn parse_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

/// Parses the first sheet of an xlsx file into product records.
///
/// The whole parse fails on an empty sheet or on any row without a
/// product code: the header mapping is assumed reliable, so a missing
/// identifier means the file itself is invalid, and nothing from it may
/// reach persistence.
pub fn parse_products(bytes: &[u8]) -> Result<Vec<Product>, anyhow::Error> {
    let mut workbook =
        Xlsx::new(Cursor::new(bytes)).context("Unable to open the spreadsheet")?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("The spreadsheet has no sheets"))?
        .context("Unable to read the first sheet")?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|r| r.iter().map(cell_to_string).collect())
        .unwrap_or_default();
    let header_map = build_header_map(&headers);

    let mut products = Vec::new();
    for (idx, row) in rows.enumerate() {
        if row.iter().all(|c| cell_to_string(c).is_empty()) {
            continue;
        }
        let get = |field: Field| -> String {
            header_map
                .get(&field)
                .and_then(|&i| row.get(i))
                .map(cell_to_string)
                .unwrap_or_default()
        };

        let ref_brk = get(Field::RefBrk);
        // REF BRK doubles as the product code when CODIGO BRK is absent.
        let codigo_brk = non_empty(get(Field::CodigoBrk)).unwrap_or_else(|| ref_brk.clone());
        if codigo_brk.trim().is_empty() {
            return Err(anyhow!(
                "Row {}: no valid CODIGO BRK or REF BRK value found. Available headers: {}",
                idx + 1,
                headers.join(", ")
            ));
        }

        let subgrupo = get(Field::Subgrupo);
        let posicion = get(Field::Posicion);
        let marca = get(Field::Marca);
        let linea = get(Field::Linea);
        let modelo = get(Field::Modelo);
        let version = get(Field::Version);

        products.push(Product {
            sku: derive_sku(&codigo_brk, &marca, &linea, &modelo),
            name: Some(derive_name(&marca, &linea, &modelo, &subgrupo)),
            description: non_empty(derive_description(
                &subgrupo, &posicion, &marca, &linea, &modelo, &version,
            )),
            category: non_empty(subgrupo.clone()),
            vendor: Some("BRK".to_string()),
            codigo_brk,
            subgrupo: non_empty(subgrupo),
            ref_brk: non_empty(ref_brk),
            posicion: non_empty(posicion),
            ref_fmsi_oem: non_empty(get(Field::RefFmsiOem)),
            marca: non_empty(marca),
            linea: non_empty(linea),
            modelo: non_empty(modelo),
            version: non_empty(version),
            price: parse_decimal(&get(Field::Precio)),
            stock: parse_u32(&get(Field::Stock)),
            largo_mm: parse_f64(&get(Field::LargoMm)),
            ancho_mm: parse_f64(&get(Field::AnchoMm)),
            espesor_mm: parse_f64(&get(Field::EspesorMm)),
            diametro_a_mm: parse_f64(&get(Field::DiametroAMm)),
            alto_b_mm: parse_f64(&get(Field::AltoBMm)),
            espesor_c_mm: parse_f64(&get(Field::EspesorCMm)),
            espesor_min_mm: parse_f64(&get(Field::EspesorMinMm)),
            agujeros: non_empty(get(Field::Agujeros)),
            diametro_interno_a_mm: parse_f64(&get(Field::DiametroInternoAMm)),
            diametro_orificio_central_c_mm: parse_f64(&get(Field::DiametroOrificioCentralCMm)),
            altura_total_d_mm: parse_f64(&get(Field::AlturaTotalDMm)),
            agujeros4: non_empty(get(Field::Agujeros4)),
            diametro_interno_maximo: parse_f64(&get(Field::DiametroInternoMaximo)),
            diametro: parse_f64(&get(Field::Diametro)),
            largo: parse_f64(&get(Field::Largo)),
            x_juego_pastilla: non_empty(get(Field::XJuegoPastilla)),
            largo_mm10: parse_f64(&get(Field::LargoMm10)),
            images: Vec::new(),
            created_at: None,
            updated_at: None,
        });
    }

    if products.is_empty() {
        return Err(anyhow!("The spreadsheet is empty"));
    }
    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn sheet(rows: &[&[&str]]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                worksheet.write_string(r as u32, c as u16, *value).unwrap();
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn headers_match_case_and_accent_insensitively() {
        for header in ["Código BRK", "CODIGO BRK", "codigoBrk", "códigobrk"] {
            assert_eq!(
                Some(Field::CodigoBrk),
                map_header(&normalize_header(header)),
                "header {header:?} did not map"
            );
        }
        assert_eq!(Some(Field::RefBrk), map_header(&normalize_header("REF BRK")));
        assert_eq!(Some(Field::Subgrupo), map_header(&normalize_header("Subgrupo")));
        assert_eq!(
            Some(Field::RefFmsiOem),
            map_header(&normalize_header("REF FMSI / OEM"))
        );
        assert_eq!(None, map_header(&normalize_header("Comentarios")));
    }

    #[test]
    fn dimensional_headers_map_most_specific_first() {
        assert_eq!(Some(Field::LargoMm), map_header(&normalize_header("LARGO (mm)")));
        assert_eq!(
            Some(Field::LargoMm10),
            map_header(&normalize_header("LARGO (mm)10"))
        );
        assert_eq!(
            Some(Field::EspesorMm),
            map_header(&normalize_header("ESPESOR mm"))
        );
        assert_eq!(
            Some(Field::EspesorMinMm),
            map_header(&normalize_header("ESPESOR MIN, mm"))
        );
        assert_eq!(
            Some(Field::EspesorCMm),
            map_header(&normalize_header("ESPESOR (C) mm"))
        );
        assert_eq!(
            Some(Field::DiametroAMm),
            map_header(&normalize_header("DIÁMETRO (A) mm"))
        );
        assert_eq!(
            Some(Field::DiametroInternoAMm),
            map_header(&normalize_header("DIÁMETRO INTERNO (A) mm"))
        );
        assert_eq!(
            Some(Field::DiametroInternoMaximo),
            map_header(&normalize_header("DIÁMETRO INTERNO MÁXIMO"))
        );
        assert_eq!(
            Some(Field::AlturaTotalDMm),
            map_header(&normalize_header("ALTURA TOTAL (D) mm"))
        );
        assert_eq!(Some(Field::Diametro), map_header(&normalize_header("DIÁMETRO")));
        assert_eq!(Some(Field::Largo), map_header(&normalize_header("LARGO")));
    }

    #[test]
    fn parses_rows_and_derives_fields() {
        let bytes = sheet(&[
            &["CÓDIGO BRK", "REF BRK", "MARCA", "LINEA", "MODELO", "SUBGRUPO", "POSICION", "LARGO (mm)"],
            &["BRK001", "BRK001", "Ford", "Focus", "Mk3", "Pastillas", "Delantera", "150.5"],
        ]);
        let products = parse_products(&bytes).unwrap();
        assert_eq!(1, products.len());
        let p = &products[0];
        assert_eq!("BRK001", p.codigo_brk);
        assert_eq!("BRK001FORDFOCUSMK3", p.sku);
        assert_eq!(Some("Ford Focus Mk3 Pastillas".to_string()), p.name);
        assert_eq!(
            Some("Pastillas Delantera para Ford Focus Mk3".to_string()),
            p.description
        );
        assert_eq!(Some("Pastillas".to_string()), p.category);
        assert_eq!(Some(150.5), p.largo_mm);
        assert!(p.images.is_empty());
    }

    #[test]
    fn blank_numerics_stay_none_not_zero() {
        let bytes = sheet(&[
            &["CODIGO BRK", "LARGO (mm)", "ANCHO (mm)", "PRECIO", "STOCK"],
            &["B1", "", "n/a", "", ""],
        ]);
        let products = parse_products(&bytes).unwrap();
        let p = &products[0];
        assert_eq!(None, p.largo_mm);
        assert_eq!(None, p.ancho_mm);
        assert_eq!(None, p.price);
        assert_eq!(None, p.stock);
    }

    #[test]
    fn zero_is_preserved_as_zero() {
        let bytes = sheet(&[&["CODIGO BRK", "ESPESOR mm"], &["B1", "0"]]);
        let products = parse_products(&bytes).unwrap();
        assert_eq!(Some(0.0), products[0].espesor_mm);
    }

    #[test]
    fn code_falls_back_to_ref_brk() {
        let bytes = sheet(&[&["CODIGO BRK", "REF BRK"], &["", "R77"]]);
        let products = parse_products(&bytes).unwrap();
        assert_eq!("R77", products[0].codigo_brk);
        assert_eq!(Some("R77".to_string()), products[0].ref_brk);
    }

    #[test]
    fn row_without_code_fails_the_whole_parse() {
        let bytes = sheet(&[
            &["CODIGO BRK", "MARCA"],
            &["B1", "Ford"],
            &["", "VW"],
        ]);
        let err = parse_products(&bytes).unwrap_err();
        assert!(err.to_string().contains("Row 2"), "{err}");
    }

    #[test]
    fn missing_code_column_fails_before_any_record() {
        let bytes = sheet(&[&["MARCA", "LINEA"], &["Ford", "Focus"]]);
        assert!(parse_products(&bytes).is_err());
    }

    #[test]
    fn empty_sheet_fails() {
        let bytes = sheet(&[&["CODIGO BRK", "MARCA"]]);
        assert!(parse_products(&bytes).is_err());
        let bytes = sheet(&[]);
        assert!(parse_products(&bytes).is_err());
    }

    #[test]
    fn garbage_input_fails_to_open() {
        assert!(parse_products(b"not a spreadsheet").is_err());
    }
}
