//! Output files: offset math over the file table and the writer task.

mod layout;
mod writer;

pub use layout::FileLayout;
pub use writer::{PieceBlock, PieceWriter};
