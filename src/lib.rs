// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod listener;
pub mod publisher;
pub mod queue;
pub mod topology;
