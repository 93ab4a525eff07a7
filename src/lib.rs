//! Faultprobe - fault-injection campaigns with hardware counter telemetry
//!
//! This library runs controlled bit-flip campaigns against a target
//! program, collects a fixed four-counter hardware telemetry sample per
//! execution, classifies each fault trial as benign, SDC or crash from
//! its replay behavior, and persists labeled feature vectors for an
//! external classifier.

pub mod campaign;
pub mod cli;
pub mod control;
pub mod dataset;
pub mod fault;
pub mod injector;
pub mod report;
pub mod symbols;
pub mod target;
pub mod telemetry;
