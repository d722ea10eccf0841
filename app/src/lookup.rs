/// Product metadata for a decoded code.
pub trait MetadataLookup: Send + Sync {
    fn lookup(&self, code: &str) -> String;
}

/// Stand-in until a real product database is wired up: the same fixed sheet
/// for every code.
#[derive(Debug, Default)]
pub struct MockLookup;

impl MetadataLookup for MockLookup {
    fn lookup(&self, code: &str) -> String {
        format!(
            "Mock Product Name: Example Food\n\
             Calories: 200\n\
             Total Fat: 8g\n\
             Sugars: 12g\n\
             (Barcode: {code})\n"
        )
    }
}
