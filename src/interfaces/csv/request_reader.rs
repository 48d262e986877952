use crate::application::gateway::SubmitRequest;
use crate::error::{LedgerError, Result};
use std::io::Read;

/// Reads submit requests from a CSV source.
///
/// Expected header: `id, type, amount, account_id, timestamp`. The timestamp
/// column may be left empty (or omitted) to let the gateway stamp the request.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes requests.
    pub fn requests(self) -> impl Iterator<Item = Result<SubmitRequest>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
