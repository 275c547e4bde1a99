use anyhow::Context;
use rust_xlsxwriter::{Format, Workbook};

pub const TEMPLATE_FILENAME: &str = "plantilla_productos_brk.xlsx";

const HEADERS: [&str; 28] = [
    "CÓDIGO BRK",
    "REF BRK",
    "SUBGRUPO",
    "POSICIÓN",
    "REF FMSI / OEM",
    "MARCA",
    "LÍNEA",
    "MODELO",
    "VERSIÓN",
    "PRECIO",
    "STOCK",
    "LARGO (mm)",
    "ANCHO (mm)",
    "ESPESOR mm",
    "DIÁMETRO (A) mm",
    "ALTO (B) mm",
    "ESPESOR (C) mm",
    "ESPESOR MIN, mm",
    "AGUJEROS",
    "DIÁMETRO INTERNO (A) mm",
    "DIÁMETRO ORIFICIO CENTRAL (C) mm",
    "ALTURA TOTAL (D) mm",
    "AGUJEROS4",
    "DIÁMETRO INTERNO MÁXIMO",
    "DIÁMETRO",
    "LARGO",
    "X JUEGO PASTILLA",
    "LARGO (mm)10",
];

const EXAMPLE_ROWS: [[&str; 28]; 2] = [
    [
        "BRK001", "BRK001", "Pastillas", "Delantera", "D1234", "Ford", "Focus", "Mk3",
        "2015-2018", "150.00", "25", "150.5", "65.2", "17.8", "", "", "", "", "4", "", "", "",
        "", "", "", "", "1", "",
    ],
    [
        "BRK002", "BRK002", "Discos", "Trasera", "D5678", "Chevrolet", "Cruze", "LT",
        "2017-2020", "280.00", "12", "", "", "", "300", "52", "12", "10.5", "5", "62", "67.1",
        "49.5", "5", "70", "300", "", "", "",
    ],
];

/// Builds the downloadable xlsx template: the full header vocabulary the
/// importer understands plus two filled-in example rows.
pub fn create_template() -> Result<Vec<u8>, anyhow::Error> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let bold = Format::new().set_bold();

    for (col, header) in HEADERS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &bold)
            .context("Unable to write template header")?;
        worksheet
            .set_column_width(col as u16, header.len().max(10) as f64)
            .context("Unable to size template column")?;
    }
    for (row, values) in EXAMPLE_ROWS.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            if !value.is_empty() {
                worksheet
                    .write_string(row as u32 + 1, col as u16, *value)
                    .context("Unable to write template example row")?;
            }
        }
    }

    workbook
        .save_to_buffer()
        .context("Unable to serialize the template workbook")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::parse_products;
    use rust_decimal::Decimal;

    #[test]
    fn template_round_trips_through_the_importer() {
        let bytes = create_template().unwrap();
        let products = parse_products(&bytes).unwrap();
        assert_eq!(2, products.len());

        let pad = &products[0];
        assert_eq!("BRK001", pad.codigo_brk);
        assert_eq!(Some("Pastillas".to_string()), pad.subgrupo);
        assert_eq!(Some(Decimal::new(15000, 2)), pad.price);
        assert_eq!(Some(150.5), pad.largo_mm);

        let disc = &products[1];
        assert_eq!("BRK002", disc.codigo_brk);
        assert_eq!(Some(300.0), disc.diametro_a_mm);
        assert_eq!(Some(67.1), disc.diametro_orificio_central_c_mm);
        assert_eq!(Some(300.0), disc.diametro);
    }

    #[test]
    fn every_template_header_is_understood() {
        use crate::spreadsheet::{map_header, normalize_header};
        for header in HEADERS {
            assert!(
                map_header(&normalize_header(header)).is_some(),
                "header {header:?} is not mapped"
            );
        }
    }
}
