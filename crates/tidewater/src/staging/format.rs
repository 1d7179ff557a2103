//! Encoding of record batches into staged file bodies.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use flate2::write::GzEncoder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::io::Write;

use crate::config::{Compression, StagingFormat};
use crate::error::{CompressSnafu, EncodeSnafu, ParquetSnafu, StagingError};

/// Marker written for NULL in CSV files, distinct from an empty string.
pub const CSV_NULL: &str = "\\N";

/// Compression actually applied to a file of `format`.
///
/// Parquet pages are compressed internally and COPY rejects a gzipped
/// Parquet file, so whole-file compression only applies to text formats.
pub fn effective_compression(format: StagingFormat, compression: Compression) -> Compression {
    match format {
        StagingFormat::Parquet => Compression::None,
        StagingFormat::Csv | StagingFormat::Json => compression,
    }
}

/// File name suffix, e.g. `csv.gz`.
pub fn file_extension(format: StagingFormat, compression: Compression) -> String {
    match effective_compression(format, compression) {
        Compression::None => format.extension().to_string(),
        Compression::Gzip => format!("{}.gz", format.extension()),
    }
}

/// Encode `batches` as one file body.
pub fn encode(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    format: StagingFormat,
    compression: Compression,
) -> Result<Vec<u8>, StagingError> {
    let raw = match format {
        StagingFormat::Parquet => encode_parquet(schema, batches)?,
        StagingFormat::Csv => encode_csv(batches)?,
        StagingFormat::Json => encode_ndjson(batches)?,
    };

    match effective_compression(format, compression) {
        Compression::None => Ok(raw),
        Compression::Gzip => gzip(&raw),
    }
}

fn encode_parquet(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<Vec<u8>, StagingError> {
    let props = WriterProperties::builder()
        .set_compression(ParquetCompression::SNAPPY)
        .build();
    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, schema.clone(), Some(props)).context(ParquetSnafu)?;
    for batch in batches {
        writer.write(batch).context(ParquetSnafu)?;
    }
    writer.close().context(ParquetSnafu)?;
    Ok(buffer)
}

fn encode_csv(batches: &[RecordBatch]) -> Result<Vec<u8>, StagingError> {
    let mut buffer = Vec::new();
    {
        let mut writer = arrow::csv::WriterBuilder::new()
            .with_header(true)
            .with_null(CSV_NULL.to_string())
            .build(&mut buffer);
        for batch in batches {
            writer.write(batch).context(EncodeSnafu)?;
        }
    }
    Ok(buffer)
}

fn encode_ndjson(batches: &[RecordBatch]) -> Result<Vec<u8>, StagingError> {
    let mut buffer = Vec::new();
    let mut writer = arrow::json::LineDelimitedWriter::new(&mut buffer);
    for batch in batches {
        writer.write(batch).context(EncodeSnafu)?;
    }
    writer.finish().context(EncodeSnafu)?;
    drop(writer);
    Ok(buffer)
}

fn gzip(raw: &[u8]) -> Result<Vec<u8>, StagingError> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(raw).context(CompressSnafu)?;
    encoder.finish().context(CompressSnafu)
}
