pub mod es_ekf;

pub use es_ekf::{EsEkf, FilterPhase, NavState, CORRECTION_DAMPING};
