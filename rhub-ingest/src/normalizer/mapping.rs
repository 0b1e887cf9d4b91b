//! Per-source field mapping tables
//!
//! Declarative descriptions of how each agency's native payload maps onto
//! the canonical shape. Each entry is a list of JSON pointers tried in
//! order; the first present value wins. Adding a source means adding a
//! `SourceSpec` here and a connector implementation, nothing else.

/// JSON-pointer candidates per canonical field
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub product_name: &'static [&'static str],
    pub brand: &'static [&'static str],
    pub model_numbers: &'static [&'static str],
    pub identifying_codes: &'static [&'static str],
    pub category: &'static [&'static str],
    pub hazard_type: &'static [&'static str],
    pub hazard_description: &'static [&'static str],
    /// Per-record country; empty for single-country sources (the spec's
    /// fixed country applies)
    pub country: &'static [&'static str],
    pub recall_date: &'static [&'static str],
    /// chrono format strings tried in order (RFC3339 is always tried first)
    pub date_formats: &'static [&'static str],
}

/// Static description of one source: identity, merge priority, authority
/// weight for risk scoring, and the field mapping table
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec {
    /// Registry key, also the watermark key (e.g. "cpsc")
    pub code: &'static str,
    /// Canonical agency name stored on rows (e.g. "CPSC")
    pub agency: &'static str,
    /// Country applied when the payload carries none
    pub country: &'static str,
    /// Source-authority contribution to the risk score (0–15)
    pub authority_weight: u8,
    /// Merge tie-break order; lower is preferred
    pub priority: u8,
    pub field_map: FieldMap,
}

/// All known sources, in priority order
pub const SOURCES: &[SourceSpec] = &[
    SourceSpec {
        code: "cpsc",
        agency: "CPSC",
        country: "US",
        authority_weight: 15,
        priority: 1,
        field_map: FieldMap {
            product_name: &["/Products/0/Name", "/Title"],
            brand: &["/Manufacturers/0/Name", "/Products/0/Manufacturer"],
            model_numbers: &["/Products/0/Model"],
            identifying_codes: &["/Products/0/UPC"],
            category: &["/Products/0/Type"],
            hazard_type: &["/Hazards/0/Name"],
            hazard_description: &["/Hazards/0/Name", "/Description"],
            country: &[],
            recall_date: &["/RecallDate"],
            date_formats: &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"],
        },
    },
    SourceSpec {
        code: "fda",
        agency: "FDA",
        country: "US",
        authority_weight: 15,
        priority: 2,
        field_map: FieldMap {
            product_name: &["/product_description"],
            brand: &["/recalling_firm"],
            model_numbers: &[],
            identifying_codes: &["/code_info"],
            category: &["/product_type"],
            hazard_type: &["/reason_for_recall"],
            hazard_description: &["/reason_for_recall"],
            country: &["/country"],
            recall_date: &["/recall_initiation_date"],
            date_formats: &["%Y%m%d", "%Y-%m-%d"],
        },
    },
    SourceSpec {
        code: "eu_safety_gate",
        agency: "EU-SAFETY-GATE",
        country: "EU",
        authority_weight: 14,
        priority: 3,
        field_map: FieldMap {
            product_name: &["/product/name"],
            brand: &["/product/brand"],
            model_numbers: &["/product/models"],
            identifying_codes: &["/product/barcode"],
            category: &["/product/category"],
            hazard_type: &["/risk/type"],
            hazard_description: &["/risk/description"],
            country: &["/country"],
            recall_date: &["/publicationDate"],
            date_formats: &["%d/%m/%Y", "%Y-%m-%d"],
        },
    },
    SourceSpec {
        code: "health_canada",
        agency: "HEALTH-CANADA",
        country: "CA",
        authority_weight: 13,
        priority: 4,
        field_map: FieldMap {
            product_name: &["/title", "/productName"],
            brand: &["/brandName"],
            model_numbers: &["/modelNumbers"],
            identifying_codes: &["/upcs"],
            category: &["/category/0"],
            hazard_type: &["/hazard"],
            hazard_description: &["/hazardDescription", "/hazard"],
            country: &[],
            recall_date: &["/datePublished"],
            date_formats: &["%Y-%m-%d"],
        },
    },
    SourceSpec {
        code: "accc",
        agency: "ACCC",
        country: "AU",
        authority_weight: 12,
        priority: 5,
        field_map: FieldMap {
            product_name: &["/title"],
            brand: &["/supplier"],
            model_numbers: &["/models"],
            identifying_codes: &["/praNumber"],
            category: &["/productCategory"],
            hazard_type: &["/hazard"],
            hazard_description: &["/defect", "/hazard"],
            country: &[],
            recall_date: &["/dateCreated"],
            date_formats: &["%d/%m/%Y", "%Y-%m-%d"],
        },
    },
    SourceSpec {
        code: "oecd",
        agency: "OECD-GLOBALRECALLS",
        country: "INTL",
        authority_weight: 10,
        priority: 6,
        field_map: FieldMap {
            product_name: &["/data/productName"],
            brand: &["/data/brandName"],
            model_numbers: &["/data/models"],
            identifying_codes: &["/data/barcodes"],
            category: &["/data/category"],
            hazard_type: &["/data/hazardType"],
            hazard_description: &["/data/hazardDescription"],
            country: &["/jurisdiction/country"],
            recall_date: &["/date"],
            date_formats: &["%Y-%m-%d", "%d-%m-%Y"],
        },
    },
];

/// Look up the spec for a source code
pub fn source_spec(code: &str) -> Option<&'static SourceSpec> {
    SOURCES.iter().find(|s| s.code == code)
}

/// Look up the authority weight for a canonical agency name
pub fn authority_weight_for_agency(agency: &str) -> u8 {
    SOURCES
        .iter()
        .find(|s| s.agency == agency)
        .map(|s| s.authority_weight)
        .unwrap_or(0)
}

/// Keyword table mapping free-text hazard wording onto canonical hazard
/// types (first match wins, most specific first)
pub const HAZARD_CANON: &[(&str, &str)] = &[
    ("electrocution", "electric_shock"),
    ("electric shock", "electric_shock"),
    ("shock", "electric_shock"),
    ("fire", "fire"),
    ("flammab", "fire"),
    ("burn", "burn"),
    ("scald", "burn"),
    ("drown", "drowning"),
    ("chok", "choking"),
    ("small part", "choking"),
    ("ingest", "choking"),
    ("suffocat", "choking"),
    ("strangul", "entrapment"),
    ("entrap", "entrapment"),
    ("chemical", "chemical"),
    ("toxic", "chemical"),
    ("lead", "chemical"),
    ("poison", "chemical"),
    ("bacteria", "microbiological"),
    ("listeria", "microbiological"),
    ("salmonella", "microbiological"),
    ("mold", "microbiological"),
    ("fall", "fall"),
    ("tip-over", "fall"),
    ("tip over", "fall"),
    ("laceration", "laceration"),
    ("cut", "laceration"),
    ("sharp", "laceration"),
    ("injur", "injury"),
];

/// Keyword table mapping native category wording onto canonical categories
pub const CATEGORY_CANON: &[(&str, &str)] = &[
    ("nursery", "nursery"),
    ("baby", "nursery"),
    ("infant", "nursery"),
    ("child", "nursery"),
    ("stroller", "nursery"),
    ("crib", "nursery"),
    ("toy", "toys"),
    ("electr", "electronics"),
    ("battery", "electronics"),
    ("charger", "electronics"),
    ("appliance", "appliances"),
    ("heater", "appliances"),
    ("food", "food_contact"),
    ("drug", "food_contact"),
    ("kitchen", "food_contact"),
    ("furniture", "furniture"),
    ("dresser", "furniture"),
    ("chair", "furniture"),
    ("sport", "sports"),
    ("bicycle", "sports"),
    ("exercise", "sports"),
    ("cloth", "clothing"),
    ("apparel", "clothing"),
    ("garment", "clothing"),
    ("vehicle", "automotive"),
    ("automotive", "automotive"),
];

/// Canonicalize free text against a keyword table; returns the canonical
/// token and whether anything matched
pub fn canonicalize(table: &[(&str, &str)], text: &str) -> (String, bool) {
    let lowered = text.to_lowercase();
    for (keyword, canonical) in table {
        if lowered.contains(keyword) {
            return ((*canonical).to_string(), true);
        }
    }
    ("other".to_string(), false)
}
