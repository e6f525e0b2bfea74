use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::domain::listing::{Listing, SourceTag};
use crate::repository::{CatalogReader, RepositoryError, RepositoryResult};

/// Column order of header-less catalog exports.
const CSV_COLUMNS: [&str; 13] = [
    "id",
    "sku",
    "title",
    "image",
    "url",
    "platform",
    "connect",
    "price",
    "uncertainty_problem",
    "query",
    "annotator",
    "created_at",
    "updated_at",
];

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    query: String,
}

fn parse_number(value: &str) -> Option<f64> {
    let cleaned = value.trim().replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl CsvRow {
    /// Converts a row into a listing, rejecting rows without a usable id,
    /// title or price.
    fn into_listing(self, source: SourceTag) -> Option<Listing> {
        let id = self.id.trim().parse::<i64>().ok().or_else(|| {
            parse_number(&self.id)
                .filter(|v| v.fract() == 0.0)
                .map(|v| v as i64)
        })?;
        let price = parse_number(&self.price).filter(|p| *p >= 0.0)?;
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return None;
        }

        Some(Listing {
            id,
            sku: self.sku.trim().to_string(),
            title,
            price: Some(price),
            image_url: self.image,
            source_url: self.url,
            source_tag: source,
            query_category: self.query.trim().to_string(),
        })
    }
}

fn has_header(first_line: &str) -> bool {
    first_line.starts_with("id,") || first_line.starts_with("\"id\"")
}

/// Reads one catalog export. A missing or empty file is an empty catalog.
pub fn read_catalog(path: &Path, source: SourceTag) -> RepositoryResult<Vec<Listing>> {
    if !path.exists() {
        log::warn!("Catalog {source} file {} does not exist", path.display());
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| RepositoryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let content = content.trim_start_matches('\u{feff}');
    let data = if content.lines().next().is_some_and(has_header) {
        content.to_string()
    } else {
        format!("{}\n{content}", CSV_COLUMNS.join(","))
    };
    let mut reader = ::csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());

    let mut listings = Vec::new();
    let mut dropped = 0;
    for row in reader.deserialize::<CsvRow>() {
        match row.ok().and_then(|row| row.into_listing(source)) {
            Some(listing) => listings.push(listing),
            None => dropped += 1,
        }
    }

    log::info!(
        "Loaded catalog {source} from {}: listings={}, dropped={dropped}",
        path.display(),
        listings.len()
    );
    Ok(listings)
}

/// Both catalogs held in memory, read-only once loaded.
pub struct CsvCatalog {
    listings_a: Vec<Listing>,
    listings_b: Vec<Listing>,
}

impl CsvCatalog {
    pub fn open(path_a: &Path, path_b: &Path) -> RepositoryResult<Self> {
        Ok(Self {
            listings_a: read_catalog(path_a, SourceTag::A)?,
            listings_b: read_catalog(path_b, SourceTag::B)?,
        })
    }

    fn listings(&self, source: SourceTag) -> &[Listing] {
        match source {
            SourceTag::A => &self.listings_a,
            SourceTag::B => &self.listings_b,
        }
    }
}

impl CatalogReader for CsvCatalog {
    fn list_categories(&self) -> RepositoryResult<Vec<String>> {
        let categories: BTreeSet<&str> = self
            .listings_a
            .iter()
            .map(|l| l.query_category.as_str())
            .collect();
        Ok(categories.into_iter().map(str::to_string).collect())
    }

    fn list_listings(&self, source: SourceTag, category: &str) -> RepositoryResult<Vec<Listing>> {
        Ok(self
            .listings(source)
            .iter()
            .filter(|l| l.query_category == category)
            .cloned()
            .collect())
    }

    fn get_listing(&self, source: SourceTag, id: i64) -> RepositoryResult<Listing> {
        self.listings(source)
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("listing {id} in catalog {source}")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(content.as_bytes()).expect("write file");
        path
    }

    #[test]
    fn reads_catalog_with_header_and_drops_unusable_rows() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_file(
            dir.path(),
            "a.csv",
            "id,sku,title,image,url,platform,connect,price,uncertainty_problem,query,annotator,created_at,updated_at\n\
             1,S1,Dyson V8 無線吸塵器 黑色,http://img/1,http://a/1,momo,,12900.00,0,dyson,model_prediction,,\n\
             2,S2,,http://img/2,http://a/2,momo,,100.00,0,dyson,model_prediction,,\n\
             3,S3,No price,http://img/3,http://a/3,momo,,,0,dyson,model_prediction,,\n\
             4,S4,\"Dyson V10, 金色\",http://img/4,http://a/4,momo,,\"15,900\",0,dyson,model_prediction,,\n",
        );

        let listings = read_catalog(&path, SourceTag::A).expect("read catalog");

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].title, "Dyson V8 無線吸塵器 黑色");
        assert_eq!(listings[0].price, Some(12900.0));
        assert_eq!(listings[0].image_url, "http://img/1");
        assert_eq!(listings[1].title, "Dyson V10, 金色");
        assert_eq!(listings[1].price, Some(15900.0));
        assert!(listings.iter().all(|l| l.source_tag == SourceTag::A));
    }

    #[test]
    fn reads_headerless_catalog_in_fixed_column_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_file(
            dir.path(),
            "b.csv",
            "7,SKU7,Dyson V8 無線吸塵器 白色,http://img/7,http://b/7,pchome,,11900.00,0,dyson,model_prediction,2024-01-01,2024-01-01\n",
        );

        let listings = read_catalog(&path, SourceTag::B).expect("read catalog");

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, 7);
        assert_eq!(listings[0].sku, "SKU7");
        assert_eq!(listings[0].source_url, "http://b/7");
        assert_eq!(listings[0].query_category, "dyson");
    }

    #[test]
    fn missing_or_empty_files_are_empty_catalogs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let empty = write_file(dir.path(), "empty.csv", "");

        assert!(read_catalog(&empty, SourceTag::A).expect("empty").is_empty());
        assert!(
            read_catalog(&dir.path().join("nope.csv"), SourceTag::B)
                .expect("missing")
                .is_empty()
        );
    }

    #[test]
    fn catalog_filters_by_source_and_category() {
        let dir = tempfile::tempdir().expect("temp dir");
        let a = write_file(
            dir.path(),
            "a.csv",
            "1,S1,Dyson V8,,,momo,,100,0,dyson,,,\n2,S2,Logitech MX,,,momo,,50,0,mouse,,,\n",
        );
        let b = write_file(
            dir.path(),
            "b.csv",
            "1,T1,Dyson V8 白色,,,pchome,,90,0,dyson,,,\n",
        );

        let catalog = CsvCatalog::open(&a, &b).expect("open catalog");

        assert_eq!(
            catalog.list_categories().expect("categories"),
            vec!["dyson".to_string(), "mouse".to_string()]
        );
        let pool = catalog
            .list_listings(SourceTag::B, "dyson")
            .expect("listings");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].source_tag, SourceTag::B);
        assert_eq!(
            catalog.get_listing(SourceTag::A, 2).expect("listing").title,
            "Logitech MX"
        );
        assert!(matches!(
            catalog.get_listing(SourceTag::B, 2),
            Err(RepositoryError::NotFound(_))
        ));
    }
}
