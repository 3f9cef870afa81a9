use crate::config::InputConfig;
use crate::types::{region_file_name, OwnershipRecord, RegionFeature, Selection};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use csv::ReaderBuilder;
use futures::future::join_all;
use geo::MultiPolygon;
use geojson::GeoJson;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Join key used on both sides: trimmed, lowercased region name.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Ownership rates keyed by normalized region name. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    records: HashMap<String, OwnershipRecord>,
}

impl OwnershipTable {
    pub fn from_reader<R: Read>(reader: R, input: &InputConfig) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
        let headers = rdr.headers()?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow!("Column '{}' not found in CSV", name))
        };
        let name_idx = column(&input.join_column_csv)?;
        let total_idx = column(&input.total_column)?;
        let dog_idx = column(&input.dog_column)?;
        let cat_idx = column(&input.cat_column)?;

        let mut records = HashMap::new();
        for result in rdr.records() {
            let record = result?;
            let key = normalize_key(record.get(name_idx).unwrap_or(""));
            if key.is_empty() {
                continue;
            }

            let rate = |idx: usize| parse_rate(record.get(idx).unwrap_or(""));
            records.insert(
                key,
                OwnershipRecord {
                    total: rate(total_idx),
                    dog: rate(dog_idx),
                    cat: rate(cat_idx),
                },
            );
        }

        Ok(Self { records })
    }

    pub fn load(path: &Path, input: &InputConfig) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
        Self::from_reader(file, input)
            .with_context(|| format!("Failed to parse CSV file: {:?}", path))
    }

    /// Like `load`, but a broken statistics file degrades to an empty table.
    pub fn load_or_empty(path: &Path, input: &InputConfig) -> Self {
        match Self::load(path, input) {
            Ok(table) => {
                if table.is_empty() {
                    warn!("Statistics file {:?} has no rows, every region shows N/A", path);
                } else {
                    info!("Loaded ownership rates for {} regions", table.len());
                }
                table
            }
            Err(e) => {
                error!("Statistics unavailable, rendering without data: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn get(&self, region_name: &str) -> Option<&OwnershipRecord> {
        self.records.get(&normalize_key(region_name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(String, OwnershipRecord)> for OwnershipTable {
    fn from_iter<I: IntoIterator<Item = (String, OwnershipRecord)>>(iter: I) -> Self {
        Self {
            records: iter
                .into_iter()
                .map(|(name, record)| (normalize_key(&name), record))
                .collect(),
        }
    }
}

// Unparseable rates are kept as NaN rather than rejected.
fn parse_rate(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(f64::NAN)
}

/// Flattens a region document into its named features.
pub fn parse_region_document(text: &str, name_property: &str) -> Result<Vec<RegionFeature>> {
    let geojson: GeoJson = text.parse().context("Failed to parse GeoJSON")?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => {
            return Err(anyhow!("GeoJSON must be a Feature or FeatureCollection"))
        }
    };

    features
        .into_iter()
        .map(|feature| {
            let name = match feature.property(name_property) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };

            let geometry = match feature.geometry {
                Some(geom) => {
                    let geometry: geo::Geometry<f64> = geom
                        .value
                        .try_into()
                        .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                    polygons_of(geometry)
                }
                None => MultiPolygon::new(vec![]),
            };

            Ok(RegionFeature { name, geometry })
        })
        .collect()
}

fn polygons_of(geometry: geo::Geometry<f64>) -> MultiPolygon<f64> {
    match geometry {
        geo::Geometry::MultiPolygon(mp) => mp,
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        geo::Geometry::GeometryCollection(gc) => MultiPolygon::new(
            gc.into_iter()
                .flat_map(|g| polygons_of(g).0)
                .collect(),
        ),
        _ => MultiPolygon::new(vec![]), // Points and lines have no area to fill
    }
}

/// Where region documents come from.
#[async_trait]
pub trait RegionSource: Send + Sync {
    /// Raw text of the document for `region_id`.
    async fn fetch(&self, region_id: &str) -> Result<String>;
}

pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RegionSource for DirSource {
    async fn fetch(&self, region_id: &str) -> Result<String> {
        let path = self.root.join(region_file_name(region_id));
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read region document: {:?}", path))
    }
}

pub struct HttpSource {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl HttpSource {
    pub fn new(base: &str) -> Result<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        Ok(Self {
            client: reqwest::Client::new(),
            base: reqwest::Url::parse(&base)
                .with_context(|| format!("Invalid region source URL: {}", base))?,
        })
    }
}

#[async_trait]
impl RegionSource for HttpSource {
    async fn fetch(&self, region_id: &str) -> Result<String> {
        let url = self.base.join(&region_file_name(region_id))?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad response for {}", url))?;
        Ok(response.text().await?)
    }
}

pub fn source_from_config(input: &InputConfig) -> Result<Arc<dyn RegionSource>> {
    let location = input.region_source.as_str();
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Arc::new(HttpSource::new(location)?))
    } else {
        Ok(Arc::new(DirSource::new(location)))
    }
}

/// Fetches every document of `selection` concurrently and returns the
/// combined features once all of them have settled. Regions that fail to
/// load are logged and left out.
pub async fn fetch_selection(
    source: &dyn RegionSource,
    selection: &Selection,
    name_property: &str,
) -> Vec<RegionFeature> {
    let ids = selection.region_ids();
    let results = join_all(ids.iter().map(|id| async move {
        let text = source.fetch(id).await?;
        parse_region_document(&text, name_property)
    }))
    .await;

    let mut features = Vec::new();
    let mut failed = 0;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(mut region) => features.append(&mut region),
            Err(e) => {
                failed += 1;
                error!("Error loading the GeoJSON data for {}: {:#}", id, e);
            }
        }
    }

    info!(
        "Loaded {} features for '{}' ({} of {} documents failed)",
        features.len(),
        selection,
        failed,
        ids.len()
    );
    features
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) fn input_config() -> InputConfig {
        AppConfig::from_toml(
            r#"
            [input]
            data_csv = "pets.csv"
            region_source = "states"
            "#,
        )
        .unwrap()
        .input
    }

    pub(crate) fn square_feature(name: &str, lon: f64, lat: f64) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"name":"{name}"}},"geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}}"#,
            name = name,
            x0 = lon - 1.0,
            x1 = lon + 1.0,
            y0 = lat - 1.0,
            y1 = lat + 1.0,
        )
    }

    /// Serves a single-feature document per region, with staggered latency.
    /// Regions listed in `failing` return an error.
    pub(crate) struct FakeSource {
        pub failing: Vec<&'static str>,
        pub calls: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RegionSource for FakeSource {
        async fn fetch(&self, region_id: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // Earlier requests finish later, so completion order is reversed.
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(n as u64))).await;
            if self.failing.iter().any(|f| *f == region_id) {
                return Err(anyhow!("404 for {}", region_id));
            }
            Ok(square_feature(region_id, -100.0, 40.0))
        }
    }

    const CSV: &str = "state,total,dog,cat\n\
                       California,56,40,16\n\
                       New York ,50.5,30,29\n\
                       Texas,n/a,44,\n\
                       ,10,10,10\n";

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let table = OwnershipTable::from_reader(CSV.as_bytes(), &input_config()).unwrap();
        assert_eq!(table.len(), 3);

        let expected = OwnershipRecord {
            total: 56.0,
            dog: 40.0,
            cat: 16.0,
        };
        for spelling in ["california", "California", "CALIFORNIA", " cAlIfOrNiA "] {
            assert_eq!(table.get(spelling), Some(&expected));
        }
        assert_eq!(table.get("new york").unwrap().total, 50.5);
        assert!(table.get("calif").is_none());
    }

    #[test]
    fn every_stored_key_is_reachable_by_any_casing() {
        let table = OwnershipTable::from_reader(CSV.as_bytes(), &input_config()).unwrap();
        for name in ["california", "new york", "texas"] {
            let lower = table.get(name).unwrap();
            let shouted = table.get(&name.to_uppercase()).unwrap();
            assert_eq!(lower.dog.to_bits(), shouted.dog.to_bits());
        }
    }

    #[test]
    fn non_numeric_rates_become_nan() {
        let table = OwnershipTable::from_reader(CSV.as_bytes(), &input_config()).unwrap();
        let texas = table.get("texas").unwrap();
        assert!(texas.total.is_nan());
        assert_eq!(texas.dog, 44.0);
        assert!(texas.cat.is_nan());
    }

    #[test]
    fn missing_column_is_an_error() {
        let err =
            OwnershipTable::from_reader("state,total,dog\nOhio,1,2\n".as_bytes(), &input_config());
        assert!(err.unwrap_err().to_string().contains("cat"));
    }

    #[test]
    fn unreadable_file_yields_empty_table() {
        let table =
            OwnershipTable::load_or_empty(Path::new("/nonexistent/pets.csv"), &input_config());
        assert!(table.is_empty());
        assert!(table.get("california").is_none());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        let table = OwnershipTable::load(file.path(), &input_config()).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn single_feature_document() {
        let features = parse_region_document(&square_feature("Ohio", -82.0, 40.0), "name").unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].name, "Ohio");
        assert_eq!(features[0].geometry.0.len(), 1);
    }

    #[test]
    fn feature_collection_keeps_order_and_flattens_multipolygons() {
        let doc = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"name":"Hawaii"},"geometry":{"type":"MultiPolygon","coordinates":[
                [[[-155,19],[-154,19],[-154,20],[-155,19]]],
                [[[-157,21],[-156,21],[-156,22],[-157,21]]]]}},
            {"type":"Feature","properties":{"name":"Point Nemo"},"geometry":{"type":"Point","coordinates":[-123,-48]}},
            {"type":"Feature","properties":{"NAME":"Nameless"},"geometry":null}
        ]}"#;
        let features = parse_region_document(doc, "name").unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].name, "Hawaii");
        assert_eq!(features[0].geometry.0.len(), 2);
        assert!(features[1].geometry.0.is_empty());
        assert_eq!(features[2].name, "");
    }

    #[test]
    fn bare_geometry_is_rejected() {
        let doc = r#"{"type":"Point","coordinates":[0,0]}"#;
        assert!(parse_region_document(doc, "name").is_err());
        assert!(parse_region_document("not json", "name").is_err());
    }

    #[tokio::test]
    async fn dir_source_reads_region_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("new york.geojson"),
            square_feature("New York", -75.0, 43.0),
        )
        .unwrap();

        let source = DirSource::new(dir.path());
        let features = fetch_selection(
            &source,
            &Selection::Region("new york".to_string()),
            "name",
        )
        .await;
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].name, "New York");

        assert!(source.fetch("ohio").await.is_err());
    }

    #[tokio::test]
    async fn all_selection_waits_for_every_fetch_and_skips_failures() {
        let source = FakeSource::new(vec!["alaska", "wyoming"]);
        let features = fetch_selection(&source, &Selection::All, "name").await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 50);
        assert_eq!(features.len(), 48);
        assert_eq!(features[0].name, "alabama");
        assert!(features.iter().all(|f| f.name != "alaska"));
    }

    #[test]
    fn source_kind_follows_location() {
        let mut input = input_config();
        assert!(source_from_config(&input).is_ok());
        input.region_source = "https://example.org/geo".to_string();
        assert!(source_from_config(&input).is_ok());
        input.region_source = "http://[bad".to_string();
        assert!(source_from_config(&input).is_err());
    }

    #[tokio::test]
    async fn http_source_reports_missing_regions() {
        let app = axum::Router::new().route(
            "/states/utah.geojson",
            axum::routing::get(|| async { square_feature("Utah", -111.5, 39.5) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let source = HttpSource::new(&format!("http://{}/states", addr)).unwrap();
        let utah = source.fetch("utah").await.unwrap();
        assert_eq!(parse_region_document(&utah, "name").unwrap()[0].name, "Utah");

        let err = source.fetch("texas").await.unwrap_err();
        assert!(format!("{:#}", err).contains("404"));

        let features = fetch_selection(&source, &Selection::All, "name").await;
        assert_eq!(features.len(), 1);
    }
}
