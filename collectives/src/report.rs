//! Performance report: one row per collective invocation, written out as
//! CSV in chronological order.

use std::io;

use crate::optimizer::{Algorithm, OpKind};

#[derive(Debug, Clone)]
pub struct PerfRecord {
    /// Substrate wall clock at dispatch, seconds.
    pub timestamp: f64,
    pub op: OpKind,
    pub root: Option<usize>,
    pub bytes: usize,
    pub participants: usize,
    pub algorithm: Algorithm,
    pub elapsed_us: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PerfReport {
    records: Vec<PerfRecord>,
}

impl PerfReport {
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn record(&mut self, rec: PerfRecord) {
        self.records.push(rec);
    }

    #[inline]
    pub fn records(&self) -> &[PerfRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Plain-decimal CSV, rows in invocation order.
    pub fn write_csv<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(
            w,
            "timestamp,op,root,bytes,participants,algorithm_chosen,elapsed_us"
        )?;
        for r in &self.records {
            let root = r.root.map(|x| x.to_string()).unwrap_or_default();
            writeln!(
                w,
                "{},{},{},{},{},{},{}",
                r.timestamp, r.op, root, r.bytes, r.participants, r.algorithm, r.elapsed_us
            )?;
        }
        Ok(())
    }
}
