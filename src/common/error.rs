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
use arrow::error::ArrowError;
use thiserror::Error;

/// Failures surfaced by the hash join.
///
/// Each variant is terminal for the join it was raised in: the engine never
/// retries internally and moves to the aborted state after returning one.
#[derive(Debug, Clone, Error)]
pub enum JoinError {
    /// Bad key/output references, unsupported key types, output name
    /// collisions, or an inconsistent engine configuration.
    #[error("hash join validation error: {0}")]
    Validation(String),
    /// The residual filter references unknown columns or mixes incompatible
    /// operand types.
    #[error("hash join filter binding error: {0}")]
    Binding(String),
    /// An operation was invoked out of sequence.
    #[error("hash join state error: {0}")]
    State(String),
    /// The hash index or the unmatched bitmap could not be grown.
    #[error("hash join resource error: {0}")]
    Resource(String),
    /// A caller-supplied callback reported failure.
    #[error("hash join callback error: {0}")]
    Callback(String),
    #[error("hash join execution error: {0}")]
    Execution(String),
    #[error("arrow error: {0}")]
    Arrow(String),
}

impl From<ArrowError> for JoinError {
    fn from(err: ArrowError) -> Self {
        JoinError::Arrow(err.to_string())
    }
}

impl JoinError {
    pub fn validation(msg: impl Into<String>) -> Self {
        JoinError::Validation(msg.into())
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        JoinError::Binding(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        JoinError::State(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        JoinError::Resource(msg.into())
    }

    pub fn callback(msg: impl Into<String>) -> Self {
        JoinError::Callback(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        JoinError::Execution(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, JoinError>;
