// Eidolon Atoms — foundational types shared by every engine module.

pub mod error;
pub mod types;
