//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Recolección y agregación de métricas del servicio:
//! - Contadores de requests y latencias (p50, p95, p99)
//! - Jobs terminados por resultado y categoría de error
//! - Duración de los intentos de extracción

pub mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};
