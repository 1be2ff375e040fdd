//! # Módulo del Servidor HTTP
//! src/server/mod.rs
//!
//! Construye el servicio y lo expone sobre TCP:
//! 1. Crea store, scheduler y adaptador de extracción
//! 2. Inicia el pool de workers
//! 3. Sirve el router axum hasta la señal de apagado
//! 4. Detiene el scheduler

pub mod tcp;

pub use tcp::Server;
