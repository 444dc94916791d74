/// This module provides the flat-file (CSV) item writer.
pub mod csv;

/// This module provides the keyset-paginated relational item reader.
pub mod rdbc;
