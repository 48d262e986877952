use crate::application::gateway::AccountBalance;
use crate::error::Result;
use std::io::Write;

/// Writes account balances as CSV (`id,balance`).
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(sink),
        }
    }

    /// The header is written even when there are no accounts.
    pub fn write_accounts(
        &mut self,
        accounts: impl IntoIterator<Item = AccountBalance>,
    ) -> Result<()> {
        self.writer.write_record(["id", "balance"])?;
        for account in accounts {
            self.writer.serialize(account)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
