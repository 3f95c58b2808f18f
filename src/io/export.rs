//! Export per-voxel results to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.
//! Only fitted voxels are written; `coords` is the row-major grid position joined by `:`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::AppError;
use crate::report::VoxelResidual;

/// Write per-voxel results to a CSV file.
pub fn write_results_csv(path: &Path, residuals: &[VoxelResidual]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let mut file = BufWriter::new(file);

    writeln!(file, "index,coords,s0,f,d_star,d,kurtosis,status,rmse")
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;

    for r in residuals {
        let coords: Vec<String> = r.coords.iter().map(|c| c.to_string()).collect();
        writeln!(
            file,
            "{},{},{:.6},{:.10},{:.10},{:.10},{:.6},{},{:.6}",
            r.index,
            coords.join(":"),
            r.params.s0,
            r.params.f,
            r.params.d_star,
            r.params.d,
            r.kurtosis,
            r.status.label(),
            r.rmse,
        )
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }

    file.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush export CSV: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitStatus, IvimParams};

    #[test]
    fn writes_header_and_one_row_per_voxel() {
        let rows = vec![VoxelResidual {
            index: 3,
            coords: vec![1, 1],
            params: IvimParams {
                s0: 1000.0,
                f: 0.125,
                d_star: 0.01,
                d: 0.001,
            },
            kurtosis: 0.5,
            status: FitStatus::BoundsFallback,
            rmse: 2.5,
        }];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxels.csv");
        write_results_csv(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "index,coords,s0,f,d_star,d,kurtosis,status,rmse");
        assert_eq!(
            lines[1],
            "3,1:1,1000.000000,0.1250000000,0.0100000000,0.0010000000,0.500000,bounds_fallback,2.500000"
        );
        assert_eq!(lines.len(), 2);
    }
}
