// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Probe and build-scan kernels.
//!
//! Both operate on an immutable [`BuildArtifact`] and are safe to run from
//! any number of threads at once; the only shared write is the atomic match
//! bitmap.

use arrow::array::{ArrayRef, UInt32Array};
use arrow::record_batch::RecordBatch;

use super::build_artifact::BuildArtifact;
use super::join_probe_utils::{SideRows, arrange, build_join_batch, indices_array};
use super::layout::JoinLayout;
use crate::common::error::{JoinError, Result};
use crate::exec::hash_table::key_encoder::KeyEncoder;
use crate::exec::runtime_filter::pushdown::{BloomProbeStats, apply_bloom_filter};

/// Candidate (probe row, build row) pairs that survived the key lookup and
/// the residual filter, in probe row order.
#[derive(Debug, Default)]
struct MatchedPairs {
    probe: Vec<u32>,
    build: Vec<u32>,
}

impl MatchedPairs {
    fn is_empty(&self) -> bool {
        self.probe.is_empty()
    }
}

pub(crate) struct ProbeCore<'a> {
    pub(crate) layout: &'a JoinLayout,
    pub(crate) artifact: &'a BuildArtifact,
    pub(crate) encoder: &'a KeyEncoder,
    pub(crate) bloom_stats: &'a BloomProbeStats,
}

impl ProbeCore<'_> {
    /// Join one probe batch against the build side. Returns output pieces in
    /// the order they must be emitted.
    pub(crate) fn probe(&self, batch: &RecordBatch) -> Result<Vec<RecordBatch>> {
        let layout = self.layout;
        if batch.num_columns() != layout.probe_input_schema.fields().len() {
            return Err(JoinError::execution(format!(
                "probe batch has {} columns, expected {}",
                batch.num_columns(),
                layout.probe_input_schema.fields().len()
            )));
        }
        let num_rows = batch.num_rows();
        if num_rows == 0 {
            return Ok(Vec::new());
        }

        let pairs = self.lookup(batch)?;
        let pairs = self.apply_residual(batch, pairs)?;

        if let Some(matched) = &self.artifact.matched {
            for row in &pairs.build {
                matched.mark(*row as usize);
            }
        }

        let mut out = Vec::new();
        if layout.emit_pairs && !pairs.is_empty() {
            let probe_idx = indices_array(pairs.probe.clone());
            let build_idx = indices_array(pairs.build.clone());
            out.push(self.pair_batch(batch, &probe_idx, &build_idx)?);
        }

        if layout.probe_preserved || layout.probe_semi || layout.probe_anti {
            let mut has_match = vec![false; num_rows];
            for row in &pairs.probe {
                has_match[*row as usize] = true;
            }
            let keep_matched = layout.probe_semi;
            let rows = has_match
                .iter()
                .enumerate()
                .filter(|(_, matched)| **matched == keep_matched)
                .map(|(row, _)| row as u32)
                .collect::<Vec<_>>();
            if !rows.is_empty() {
                let probe_idx = indices_array(rows);
                out.push(self.probe_only_batch(batch, &probe_idx)?);
            }
        }
        Ok(out)
    }

    fn lookup(&self, batch: &RecordBatch) -> Result<MatchedPairs> {
        let key_arrays = self
            .layout
            .probe_key_cols
            .iter()
            .map(|idx| ArrayRef::clone(batch.column(*idx)))
            .collect::<Vec<_>>();
        let mut keys = self.encoder.encode(&key_arrays)?;
        if let Some(bloom) = &self.artifact.bloom {
            apply_bloom_filter(bloom, &mut keys, self.bloom_stats);
        }

        let table = &self.artifact.table;
        let mut pairs = MatchedPairs::default();
        for row in 0..keys.len() {
            if !keys.matchable[row] {
                continue;
            }
            let Some(group_id) = table.find_group(keys.key(row), keys.hashes[row]) else {
                continue;
            };
            for build_row in table.group_rows(group_id) {
                pairs.probe.push(row as u32);
                pairs.build.push(*build_row);
            }
        }
        Ok(pairs)
    }

    fn apply_residual(&self, batch: &RecordBatch, pairs: MatchedPairs) -> Result<MatchedPairs> {
        let layout = self.layout;
        let Some(filter) = &layout.filter else {
            return Ok(pairs);
        };
        if pairs.is_empty() {
            return Ok(pairs);
        }
        let probe_idx = indices_array(pairs.probe);
        let build_idx = indices_array(pairs.build);
        let probe_side = layout.probe_side();
        let build_side = layout.build_side;
        let (left, right) = arrange(
            build_side,
            SideRows::Take {
                batch: &self.artifact.batch,
                columns: &layout.filter_cols[build_side.index()],
                indices: &build_idx,
            },
            SideRows::Take {
                batch,
                columns: &layout.filter_cols[probe_side.index()],
                indices: &probe_idx,
            },
        );
        let filter_batch = build_join_batch(&layout.filter_schema, left, right, probe_idx.len())?;
        let mask = filter.evaluate_predicate(&filter_batch)?;

        let mut kept = MatchedPairs::default();
        for i in 0..mask.len() {
            if mask.value(i) {
                kept.probe.push(probe_idx.value(i));
                kept.build.push(build_idx.value(i));
            }
        }
        Ok(kept)
    }

    fn pair_batch(
        &self,
        batch: &RecordBatch,
        probe_idx: &UInt32Array,
        build_idx: &UInt32Array,
    ) -> Result<RecordBatch> {
        let layout = self.layout;
        let build_side = layout.build_side;
        let (left, right) = arrange(
            build_side,
            SideRows::Take {
                batch: &self.artifact.batch,
                columns: &layout.output_cols[build_side.index()],
                indices: build_idx,
            },
            SideRows::Take {
                batch,
                columns: &layout.output_cols[build_side.other().index()],
                indices: probe_idx,
            },
        );
        build_join_batch(&layout.output_schema, left, right, probe_idx.len())
    }

    fn probe_only_batch(&self, batch: &RecordBatch, probe_idx: &UInt32Array) -> Result<RecordBatch> {
        let layout = self.layout;
        let build_side = layout.build_side;
        let (left, right) = arrange(
            build_side,
            SideRows::Null {
                types: &layout.output_types[build_side.index()],
            },
            SideRows::Take {
                batch,
                columns: &layout.output_cols[build_side.other().index()],
                indices: probe_idx,
            },
        );
        build_join_batch(&layout.output_schema, left, right, probe_idx.len())
    }
}

/// Emit the build rows in `[start, end)` selected by the join type: matched
/// rows for a build-side semi join, unmatched rows otherwise.
pub(crate) fn scan_build_rows(
    layout: &JoinLayout,
    artifact: &BuildArtifact,
    start: usize,
    end: usize,
) -> Result<Option<RecordBatch>> {
    let Some(matched) = &artifact.matched else {
        return Err(JoinError::execution("build scan without a match bitmap"));
    };
    let rows = matched.collect(start, end, layout.scan_emits_matched());
    if rows.is_empty() {
        return Ok(None);
    }
    let build_idx = indices_array(rows);
    let build_side = layout.build_side;
    let probe_side = layout.probe_side();
    let (left, right) = arrange(
        build_side,
        SideRows::Take {
            batch: &artifact.batch,
            columns: &layout.output_cols[build_side.index()],
            indices: &build_idx,
        },
        SideRows::Null {
            types: &layout.output_types[probe_side.index()],
        },
    );
    build_join_batch(&layout.output_schema, left, right, build_idx.len()).map(Some)
}
