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
/// Append-only arena of encoded group keys, addressed by group id.
#[derive(Debug, Default)]
pub(crate) struct KeyArena {
    data: Vec<u8>,
    offsets: Vec<usize>,
}

impl KeyArena {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            offsets: vec![0],
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> usize {
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.data.extend_from_slice(bytes);
        self.offsets.push(self.data.len());
        self.offsets.len() - 2
    }

    pub(crate) fn get(&self, id: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(id)?;
        let end = *self.offsets.get(id + 1)?;
        self.data.get(start..end)
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.data.capacity() + self.offsets.capacity() * std::mem::size_of::<usize>()
    }
}
