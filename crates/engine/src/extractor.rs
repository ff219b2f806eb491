//! Builds result documents from a finished calculation's output database.
//!
//! All methods here call into the native library and block the calling
//! thread; async callers run them on `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cdb::{CdbError, CdbHandle, CdbLibrary, CdbRecord, NodeResult, QuadForces, TrussResult};

/// Load case the results are read for.
pub const DEFAULT_LOAD_CASE: i32 = 1;

/// Which set of record kinds a document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Truss element results and node results.
    Frame,
    /// Quad element maximum forces.
    Building,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frame => "frame",
            Self::Building => "building",
        }
    }
}

/// Results of one calculation, in database order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub calculation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truss_results: Option<Vec<TrussResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_results: Option<Vec<NodeResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad_results: Option<Vec<QuadForces>>,
}

/// Reads typed records out of result databases through a [`CdbLibrary`].
#[derive(Clone)]
pub struct ResultExtractor {
    library: Arc<dyn CdbLibrary>,
    load_case: i32,
}

impl ResultExtractor {
    pub fn new(library: Arc<dyn CdbLibrary>) -> Self {
        Self {
            library,
            load_case: DEFAULT_LOAD_CASE,
        }
    }

    /// Read records of `load_case` instead of [`DEFAULT_LOAD_CASE`].
    pub fn with_load_case(mut self, load_case: i32) -> Self {
        self.load_case = load_case;
        self
    }

    pub fn open(&self, path: &Path) -> Result<CdbHandle, CdbError> {
        CdbHandle::open(Arc::clone(&self.library), path)
    }

    pub fn extract<R: CdbRecord>(&self, handle: &CdbHandle) -> Result<Vec<R>, CdbError> {
        handle.read_all(self.load_case)
    }

    /// Truss and node results.
    pub fn frame_results(
        &self,
        path: &Path,
        calculation_id: &str,
    ) -> Result<ResultDocument, CdbError> {
        let handle = self.open(path)?;
        let truss = self.extract::<TrussResult>(&handle)?;
        let nodes = self.extract::<NodeResult>(&handle)?;
        handle.close();

        tracing::debug!(
            calculation_id,
            truss = truss.len(),
            nodes = nodes.len(),
            "Frame results extracted"
        );
        Ok(ResultDocument {
            calculation_id: calculation_id.to_string(),
            truss_results: Some(truss),
            node_results: Some(nodes),
            quad_results: None,
        })
    }

    /// Quad element forces.
    pub fn building_results(
        &self,
        path: &Path,
        calculation_id: &str,
    ) -> Result<ResultDocument, CdbError> {
        let handle = self.open(path)?;
        let quads = self.extract::<QuadForces>(&handle)?;
        handle.close();

        tracing::debug!(calculation_id, quads = quads.len(), "Building results extracted");
        Ok(ResultDocument {
            calculation_id: calculation_id.to_string(),
            quad_results: Some(quads),
            ..Default::default()
        })
    }

    pub fn document(
        &self,
        kind: DocumentKind,
        path: &Path,
        calculation_id: &str,
    ) -> Result<ResultDocument, CdbError> {
        match kind {
            DocumentKind::Frame => self.frame_results(path, calculation_id),
            DocumentKind::Building => self.building_results(path, calculation_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::cdb::test_support::FakeLibrary;

    fn cdb_file() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".cdb").tempfile().unwrap()
    }

    fn node(nr: i32, uz: f32) -> NodeResult {
        NodeResult {
            m_nr: nr,
            m_uz: uz,
            ..Default::default()
        }
    }

    #[test]
    fn frame_document_carries_truss_and_node_results() {
        let file = cdb_file();
        let truss = TrussResult {
            m_nr: 101,
            m_n: 12.5,
            m_v: 0.001,
            m_nm: 12.5,
        };
        let fake = Arc::new(
            FakeLibrary::default()
                .with(&[truss])
                .with(&[node(1, -0.25), node(2, -0.5)]),
        );
        let extractor = ResultExtractor::new(fake.clone());

        let doc = extractor.frame_results(file.path(), "job1").unwrap();

        assert_eq!(doc.calculation_id, "job1");
        assert_eq!(doc.truss_results, Some(vec![truss]));
        assert_eq!(doc.node_results.as_ref().map(Vec::len), Some(2));
        assert!(doc.quad_results.is_none());
        assert_eq!(fake.closes(), 1);
    }

    #[test]
    fn building_document_serializes_only_quads() {
        let file = cdb_file();
        let quad = QuadForces {
            m_nr: 7,
            m_mxx: 3.0,
            ..Default::default()
        };
        let fake = Arc::new(FakeLibrary::default().with(&[quad]));
        let extractor = ResultExtractor::new(fake);

        let doc = extractor
            .document(DocumentKind::Building, file.path(), "b1")
            .unwrap();
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["calculation_id"], "b1");
        assert_eq!(json["quad_results"][0]["m_nr"], 7);
        assert!(json.get("truss_results").is_none());
        assert!(json.get("node_results").is_none());
    }

    #[test]
    fn empty_database_gives_empty_sequences() {
        let file = cdb_file();
        let extractor = ResultExtractor::new(Arc::new(FakeLibrary::default()));

        let doc = extractor.frame_results(file.path(), "empty").unwrap();

        assert_eq!(doc.truss_results, Some(vec![]));
        assert_eq!(doc.node_results, Some(vec![]));
    }

    #[test]
    fn read_error_still_closes_the_database() {
        let file = cdb_file();
        let mut fake = FakeLibrary::default().with(&[node(1, 0.0)]);
        fake.fail_key = Some((NodeResult::KEY, 0));
        let fake = Arc::new(fake);
        let extractor = ResultExtractor::new(fake.clone());

        let result = extractor.frame_results(file.path(), "broken");

        assert_matches!(result, Err(CdbError::Read { key: 24, .. }));
        assert_eq!(fake.opens(), 1);
        assert_eq!(fake.closes(), 1);
    }

    #[test]
    fn configured_load_case_reaches_every_read() {
        let file = cdb_file();
        let fake = Arc::new(FakeLibrary::default().with(&[node(1, 0.0)]));
        let extractor = ResultExtractor::new(fake.clone()).with_load_case(4);

        extractor.frame_results(file.path(), "lc4").unwrap();

        let load_cases = fake.load_cases.lock().unwrap();
        assert!(!load_cases.is_empty());
        assert!(load_cases.iter().all(|&lc| lc == 4));
    }

    #[test]
    fn missing_database_is_an_open_error() {
        let extractor = ResultExtractor::new(Arc::new(FakeLibrary::default()));
        let result = extractor.frame_results(Path::new("/nonexistent/x.cdb"), "x");
        assert_matches!(result, Err(CdbError::Open { .. }));
    }
}
