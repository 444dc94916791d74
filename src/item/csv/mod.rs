//! Flat-file support.
//!
//! [`csv_writer::FlatFileItemWriter`] turns chunks of serializable items into
//! delimited lines, with a header line written once when the file is created.
//!
//! ```
//! use customer_batch::core::item::ItemWriter;
//! use customer_batch::item::csv::csv_writer::FlatFileItemWriterBuilder;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Person {
//!     name: String,
//!     age: u8,
//! }
//!
//! let writer = FlatFileItemWriterBuilder::new()
//!     .header(&["name", "age"])
//!     .delimiter(b';')
//!     .from_writer(Vec::new());
//!
//! ItemWriter::<Person>::open(&writer).unwrap();
//! writer
//!     .write(&[Person { name: "Alice".to_string(), age: 28 }])
//!     .unwrap();
//!
//! let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
//! assert_eq!(output, "name;age\nAlice;28\n");
//! ```

/// A module providing facilities for writing delimited flat files.
pub mod csv_writer;
