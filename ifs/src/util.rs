use num_format::{CustomFormat, Grouping};

/// Shared number format for sample and step counts in log lines.
pub fn number_format() -> CustomFormat {
    CustomFormat::builder()
        .grouping(Grouping::Standard)
        .minus_sign("-")
        .separator("_")
        .build()
        .expect("static number format definition should be valid")
}
