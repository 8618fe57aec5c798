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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arrow::array::{Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::util::display::array_value_to_string;
use tempfile::TempDir;

use novajoin::exec::chunk::Chunk;
use novajoin::exec::expr::{Expr, FieldRef};
use novajoin::exec::node::join::{JoinKeyCmp, JoinSide, JoinType};
use novajoin::exec::operators::hashjoin::{HashJoinImpl, HashJoinSchema, make_basic};
use novajoin::exec::pipeline::accumulation_queue::AccumulationQueue;
use novajoin::exec::pipeline::task_scheduler::TaskScheduler;
use novajoin::exec::pipeline::thread_pool_scheduler::ThreadPoolTaskScheduler;
use novajoin::runtime::runtime_state::{HashJoinOptions, RuntimeState};
use novajoin::{JoinError, Result};

/// Test configuration written to a temporary directory.
pub struct TestConfig {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
}

impl TestConfig {
    pub fn new(content: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novajoin.toml");
        std::fs::write(&config_path, content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }
}

pub type LeftRow = (Option<i32>, Option<&'static str>);
pub type RightRow = (Option<i32>, Option<i64>);

pub fn left_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, true),
        Field::new("name", DataType::Utf8, true),
    ]))
}

pub fn right_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, true),
        Field::new("amount", DataType::Int64, true),
    ]))
}

pub fn left_chunk(rows: &[LeftRow]) -> Chunk {
    let ids = rows.iter().map(|r| r.0).collect::<Vec<_>>();
    let names = rows.iter().map(|r| r.1).collect::<Vec<_>>();
    Chunk::new(
        RecordBatch::try_new(
            left_schema(),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .expect("left batch"),
    )
}

pub fn right_chunk(rows: &[RightRow]) -> Chunk {
    let ids = rows.iter().map(|r| r.0).collect::<Vec<_>>();
    let amounts = rows.iter().map(|r| r.1).collect::<Vec<_>>();
    Chunk::new(
        RecordBatch::try_new(
            right_schema(),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(Int64Array::from(amounts)),
            ],
        )
        .expect("right batch"),
    )
}

/// Render every output row as comma-separated cells (nulls are empty),
/// sorted so that results compare as sets.
pub fn render_rows(chunks: &[Chunk]) -> Vec<String> {
    let mut rows = Vec::new();
    for chunk in chunks {
        for row in 0..chunk.len() {
            let cells = chunk
                .columns()
                .iter()
                .map(|c| array_value_to_string(c.as_ref(), row).expect("render"))
                .collect::<Vec<_>>();
            rows.push(cells.join(","));
        }
    }
    rows.sort();
    rows
}

fn cell<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn keys_match(l: Option<i32>, r: Option<i32>, cmp: JoinKeyCmp) -> bool {
    match (l, r) {
        (Some(a), Some(b)) => a == b,
        (None, None) => cmp == JoinKeyCmp::Is,
        _ => false,
    }
}

/// Nested-loop reference join over the fixed test schemas, with default
/// outputs.
pub fn reference_join(
    join_type: JoinType,
    left: &[LeftRow],
    right: &[RightRow],
    cmp: JoinKeyCmp,
    filter: &dyn Fn(&LeftRow, &RightRow) -> bool,
) -> Vec<String> {
    let left_cells = |r: &LeftRow| vec![cell(r.0), cell(r.1)];
    let right_cells = |r: &RightRow| vec![cell(r.0), cell(r.1)];
    let nulls = || vec![String::new(), String::new()];

    let mut left_matched = vec![false; left.len()];
    let mut right_matched = vec![false; right.len()];
    let mut out = Vec::new();
    for (li, l) in left.iter().enumerate() {
        for (ri, r) in right.iter().enumerate() {
            if keys_match(l.0, r.0, cmp) && filter(l, r) {
                left_matched[li] = true;
                right_matched[ri] = true;
                if !join_type.is_semi_or_anti() {
                    let mut row = left_cells(l);
                    row.extend(right_cells(r));
                    out.push(row.join(","));
                }
            }
        }
    }
    for (li, l) in left.iter().enumerate() {
        let emit = match join_type {
            JoinType::LeftOuter | JoinType::FullOuter => !left_matched[li],
            JoinType::LeftSemi => left_matched[li],
            JoinType::LeftAnti => !left_matched[li],
            _ => false,
        };
        if emit {
            let mut row = left_cells(l);
            if !join_type.is_semi_or_anti() {
                row.extend(nulls());
            }
            out.push(row.join(","));
        }
    }
    for (ri, r) in right.iter().enumerate() {
        let emit = match join_type {
            JoinType::RightOuter | JoinType::FullOuter => !right_matched[ri],
            JoinType::RightSemi => right_matched[ri],
            JoinType::RightAnti => !right_matched[ri],
            _ => false,
        };
        if emit {
            let mut row = if join_type.is_semi_or_anti() {
                Vec::new()
            } else {
                nulls()
            };
            row.extend(right_cells(r));
            out.push(row.join(","));
        }
    }
    out.sort();
    out
}

/// How the driver threads reach the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerKind {
    Inline,
    Pool,
}

/// One join execution driven the way a pipeline would drive it.
pub struct JoinRun {
    pub join_type: JoinType,
    pub num_threads: usize,
    pub key_cmp: JoinKeyCmp,
    pub filter: Expr,
    pub options: HashJoinOptions,
    pub scheduler: SchedulerKind,
}

/// An initialized engine together with the sinks its callbacks write to.
pub struct StartedJoin {
    pub join: Box<dyn HashJoinImpl>,
    pub scheduler: Arc<ThreadPoolTaskScheduler>,
    pub ctx: Arc<RuntimeState>,
    pub out: Arc<Mutex<Vec<Chunk>>>,
    pub finished: Arc<Mutex<Vec<i64>>>,
}

pub struct JoinOutcome {
    pub rows: Vec<String>,
    pub finished: Vec<i64>,
    pub ctx: Arc<RuntimeState>,
    pub build_result: Result<()>,
}

impl JoinRun {
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            num_threads: 1,
            key_cmp: JoinKeyCmp::Eq,
            filter: Expr::literal_true(),
            options: HashJoinOptions {
                output_batch_rows: 7,
                scan_unit_rows: 5,
                mem_limit_bytes: None,
                ..HashJoinOptions::default()
            },
            scheduler: SchedulerKind::Inline,
        }
    }

    pub fn threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn key_cmp(mut self, key_cmp: JoinKeyCmp) -> Self {
        self.key_cmp = key_cmp;
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = filter;
        self
    }

    pub fn options(mut self, f: impl FnOnce(&mut HashJoinOptions)) -> Self {
        f(&mut self.options);
        self
    }

    pub fn pool(mut self) -> Self {
        self.scheduler = SchedulerKind::Pool;
        self
    }

    /// Create and initialize the engine on a fresh scheduler.
    pub fn start(&self) -> StartedJoin {
        let schema_mgr = HashJoinSchema::init(
            self.join_type,
            &left_schema(),
            &[FieldRef::name("id")],
            &right_schema(),
            &[FieldRef::name("id")],
            &self.filter,
            "",
            "",
        )
        .expect("schema");
        let ctx = Arc::new(RuntimeState::new(self.options.clone()));
        let scheduler = Arc::new(match self.scheduler {
            SchedulerKind::Inline => ThreadPoolTaskScheduler::inline(),
            SchedulerKind::Pool => ThreadPoolTaskScheduler::new(4),
        });
        let out = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(Vec::new()));
        let out_sink = Arc::clone(&out);
        let finished_sink = Arc::clone(&finished);

        let mut join = make_basic().expect("engine");
        join.init(
            Arc::clone(&ctx),
            self.join_type,
            self.num_threads,
            &schema_mgr,
            vec![self.key_cmp],
            schema_mgr.filter(),
            Arc::new(move |chunk| out_sink.lock().unwrap().push(chunk)),
            Box::new(move |total| finished_sink.lock().unwrap().push(total)),
            scheduler.clone(),
        )
        .expect("init");
        scheduler.register_end();
        StartedJoin {
            join,
            scheduler,
            ctx,
            out,
            finished,
        }
    }

    /// Rows of the configured build side are dealt round-robin to the
    /// threads in batches of `batch_rows`; probe batches are dealt the same
    /// way.
    pub fn run(&self, left: &[LeftRow], right: &[RightRow], batch_rows: usize) -> JoinOutcome {
        let StartedJoin {
            join,
            scheduler,
            ctx,
            out,
            finished,
        } = self.start();

        let left_chunks = left.chunks(batch_rows.max(1)).map(left_chunk).collect::<Vec<_>>();
        let right_chunks = right.chunks(batch_rows.max(1)).map(right_chunk).collect::<Vec<_>>();
        let (build_chunks, probe_chunks) = match self.options.build_side {
            JoinSide::Left => (left_chunks, right_chunks),
            JoinSide::Right => (right_chunks, left_chunks),
        };
        let mut build_queues = vec![AccumulationQueue::new(); self.num_threads];
        for (i, chunk) in build_chunks.into_iter().enumerate() {
            build_queues[i % self.num_threads].push(chunk);
        }
        let mut probe_batches = vec![Vec::new(); self.num_threads];
        for (i, chunk) in probe_chunks.into_iter().enumerate() {
            probe_batches[i % self.num_threads].push(chunk);
        }

        let join: &dyn HashJoinImpl = join.as_ref();
        let build_results = std::thread::scope(|s| {
            let handles = build_queues
                .into_iter()
                .enumerate()
                .map(|(thread_index, queue)| {
                    s.spawn(move || join.build_hash_table(thread_index, queue, Box::new(|_| Ok(()))))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().expect("build thread"))
                .collect::<Vec<_>>()
        });
        let build_result = build_results.into_iter().collect::<Result<Vec<_>>>().map(|_| ());
        scheduler.wait_idle();

        if build_result.is_ok() {
            std::thread::scope(|s| {
                for (thread_index, batches) in probe_batches.into_iter().enumerate() {
                    s.spawn(move || {
                        for batch in batches {
                            join.probe_single_batch(thread_index, batch).expect("probe");
                        }
                        join.probing_finished(thread_index).expect("probing finished");
                    });
                }
            });
            scheduler.wait_idle();
        }

        let rows = render_rows(&out.lock().unwrap());
        let finished = finished.lock().unwrap().clone();
        JoinOutcome {
            rows,
            finished,
            ctx,
            build_result,
        }
    }
}
