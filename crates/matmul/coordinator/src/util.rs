use eyre::{eyre, Result};
use maskmul_core::{Matrix, Operands};
use num_bigint::BigInt;
use serde::{de::DeserializeOwned, Deserialize};
use std::path::Path;

use crate::{config::OperandsProperties, error::CoordinatorError};

/// Parse a yaml configuration file into a struct
pub fn parse_config_file<T: DeserializeOwned>(location: &str) -> Result<T> {
    let file = std::fs::File::open(location)?;
    let config: T = serde_yaml::from_reader(file)?;
    Ok(config)
}

/// Prepend a file path with a base directory if the path is not absolute.
pub fn prepend_file_path<S: AsRef<str>>(file_path: S, base_dir: S) -> Result<String> {
    let path = Path::new(file_path.as_ref());
    if !path.is_absolute() {
        Ok(Path::new(base_dir.as_ref())
            .join(path)
            .to_str()
            .ok_or_else(|| eyre!("Failed to convert path to str"))?
            .to_string())
    } else {
        Ok(file_path.as_ref().to_string())
    }
}

/// Operand matrices as stored in a yaml file. Entries are integers or
/// decimal strings.
#[derive(Debug, Deserialize)]
struct OperandsFile {
    a: Vec<Row>,
    b: Vec<Row>,
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct Row(#[serde(with = "maskmul_common::decimal::vec")] Vec<BigInt>);

/// The demo product `[[1,2,3],[4,5,6]] x [[7,8],[9,10],[11,12]]`.
pub fn demo_operands() -> Result<Operands, CoordinatorError> {
    let a = Matrix::new(vec![vec![1, 2, 3], vec![4, 5, 6]])?;
    let b = Matrix::new(vec![vec![7, 8], vec![9, 10], vec![11, 12]])?;
    Ok(Operands::new(a, b)?)
}

/// Loads the operand matrices named in the config, or the demo matrices.
pub fn load_operands(config: &OperandsProperties) -> Result<Operands, CoordinatorError> {
    let Some(path) = &config.path else {
        return demo_operands();
    };

    let file: OperandsFile = parse_config_file(path)
        .map_err(|err| eyre!("Failed to load operands from {path}: {err}"))?;

    let a = Matrix::new(file.a.into_iter().map(|row| row.0).collect())?;
    let b = Matrix::new(file.b.into_iter().map(|row| row.0).collect())?;
    Ok(Operands::new(a, b)?)
}
