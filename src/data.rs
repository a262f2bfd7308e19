//! Table loading and the key join, using Polars

use crate::config::{FeatureSet, PipelineConfig};
use crate::error::{Result, SatisfactionError};
use ndarray::Array2;
use polars::prelude::*;
use std::path::Path;

/// Row position column added to the engagement side before joining
const LEFT_ROW: &str = "__left_row";
/// Row position column added to the experience side before joining
const RIGHT_ROW: &str = "__right_row";

/// Result of the key join: one entry per matched pair of rows
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedKeys {
    /// Joined key rendered as a string
    pub user_ids: Vec<String>,
    /// Row position of each match in the left table
    pub left_rows: Vec<usize>,
    /// Row position of each match in the right table
    pub right_rows: Vec<usize>,
}

impl JoinedKeys {
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// Joined users with their raw feature matrices, rows aligned with `user_ids`
#[derive(Debug, Clone)]
pub struct MergedData {
    pub user_ids: Vec<String>,
    /// Engagement features (n_users, engagement dims)
    pub engagement: Array2<f64>,
    /// Experience features (n_users, experience dims)
    pub experience: Array2<f64>,
}

impl MergedData {
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// Load a CSV file with a header row into a DataFrame
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;
    Ok(df)
}

fn require_column<'a>(df: &'a DataFrame, table: &str, name: &str) -> Result<&'a Series> {
    df.column(name)
        .map_err(|_| SatisfactionError::missing_column(table, name))
}

/// Extract the given rows of a column as finite f64 values, casting integer columns
fn numeric_column(df: &DataFrame, table: &str, name: &str, rows: &[usize]) -> Result<Vec<f64>> {
    let series = require_column(df, table, name)?;
    let values = series
        .cast(&DataType::Float64)
        .map_err(|_| SatisfactionError::Schema {
            table: table.to_string(),
            message: format!("column '{name}' is not numeric"),
        })?;
    let values = values.f64()?;

    rows.iter()
        .map(|&row| match values.get(row) {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(SatisfactionError::Schema {
                table: table.to_string(),
                message: format!("column '{name}' has a missing or non-numeric value at row {row}"),
            }),
        })
        .collect()
}

/// Build the (rows.len(), n_features) matrix for a feature set from the given source rows
pub fn feature_rows(df: &DataFrame, features: &FeatureSet, rows: &[usize]) -> Result<Array2<f64>> {
    let columns = features
        .columns
        .iter()
        .map(|name| numeric_column(df, &features.name, name, rows))
        .collect::<Result<Vec<_>>>()?;

    Ok(Array2::from_shape_fn((rows.len(), columns.len()), |(i, j)| {
        columns[j][i]
    }))
}

/// Build the (n_rows, n_features) matrix for a feature set over the whole table
pub fn feature_matrix(df: &DataFrame, features: &FeatureSet) -> Result<Array2<f64>> {
    let rows: Vec<usize> = (0..df.height()).collect();
    feature_rows(df, features, &rows)
}

fn row_positions(df: &DataFrame, name: &str) -> Result<Vec<usize>> {
    let positions = df.column(name)?.cast(&DataType::UInt64)?;
    let positions = positions
        .u64()?
        .into_no_null_iter()
        .map(|p| p as usize)
        .collect();
    Ok(positions)
}

/// Inner join two tables on `left_key = right_key`.
///
/// Duplicate keys expand to every matching pair. Matches are ordered by left
/// row position, then right row position. Numeric keys of differing dtypes are
/// compared as f64; any other dtype mismatch is compared by string form. Ids are
/// rendered from the left table's key column.
pub fn join_on_key(
    left: &DataFrame,
    right: &DataFrame,
    left_key: &str,
    right_key: &str,
) -> Result<JoinedKeys> {
    let left_dtype = require_column(left, "engagement", left_key)?.dtype().clone();
    let right_dtype = require_column(right, "experience", right_key)?.dtype().clone();

    let mut left_keys = left
        .select([left_key])?
        .with_row_index(LEFT_ROW, None)?
        .lazy();
    let mut right_keys = right
        .select([right_key])?
        .with_row_index(RIGHT_ROW, None)?
        .lazy();

    if left_dtype != right_dtype {
        let common = if left_dtype.is_numeric() && right_dtype.is_numeric() {
            DataType::Float64
        } else {
            DataType::String
        };
        tracing::debug!(?left_dtype, ?right_dtype, ?common, "key dtypes differ");
        left_keys = left_keys.with_column(col(left_key).cast(common.clone()));
        right_keys = right_keys.with_column(col(right_key).cast(common));
    }

    let joined = left_keys
        .join(
            right_keys,
            [col(left_key)],
            [col(right_key)],
            JoinArgs::new(JoinType::Inner),
        )
        .sort([LEFT_ROW, RIGHT_ROW], SortMultipleOptions::default())
        .collect()?;

    let left_rows = row_positions(&joined, LEFT_ROW)?;
    let right_rows = row_positions(&joined, RIGHT_ROW)?;

    let ids = left.column(left_key)?.cast(&DataType::String)?;
    let ids = ids.str()?;
    let user_ids = left_rows
        .iter()
        .map(|&row| ids.get(row).unwrap_or_default().to_string())
        .collect();

    Ok(JoinedKeys {
        user_ids,
        left_rows,
        right_rows,
    })
}

/// Join both tables and gather the feature matrices of the matched users.
///
/// Every configured column must exist, but values are only checked on rows
/// that survive the join.
pub fn merge_tables(
    engagement_df: &DataFrame,
    experience_df: &DataFrame,
    config: &PipelineConfig,
) -> Result<MergedData> {
    require_column(engagement_df, &config.engagement.name, &config.left_key)?;
    require_column(experience_df, &config.experience.name, &config.right_key)?;
    for column in &config.engagement.columns {
        require_column(engagement_df, &config.engagement.name, column)?;
    }
    for column in &config.experience.columns {
        require_column(experience_df, &config.experience.name, column)?;
    }

    let keys = join_on_key(
        engagement_df,
        experience_df,
        &config.left_key,
        &config.right_key,
    )?;

    tracing::info!(
        engagement_rows = engagement_df.height(),
        experience_rows = experience_df.height(),
        joined_rows = keys.len(),
        "tables joined"
    );

    if keys.is_empty() {
        return Err(SatisfactionError::EmptyInput {
            left_key: config.left_key.clone(),
            right_key: config.right_key.clone(),
        });
    }

    Ok(MergedData {
        engagement: feature_rows(engagement_df, &config.engagement, &keys.left_rows)?,
        experience: feature_rows(experience_df, &config.experience, &keys.right_rows)?,
        user_ids: keys.user_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn engagement_frame() -> DataFrame {
        df!(
            "MSISDN/Number" => &[101i64, 102, 103, 104],
            "SessionDuration" => &[10.0, 20.0, 30.0, 40.0],
            "SessionFrequency" => &[1i64, 2, 3, 4],
            "TotalTraffic" => &[100.0, 200.0, 300.0, 400.0]
        )
        .unwrap()
    }

    fn experience_frame() -> DataFrame {
        df!(
            "CustomerID" => &[104i64, 102, 999, 101],
            "AvgTCP" => &[4.0, 2.0, 9.0, 1.0],
            "AvgRTT" => &[40.0, 20.0, 90.0, 10.0],
            "AvgThroughput" => &[0.4, 0.2, 0.9, 0.1]
        )
        .unwrap()
    }

    #[test]
    fn test_join_drops_unmatched_rows_and_keeps_left_order() {
        let keys = join_on_key(
            &engagement_frame(),
            &experience_frame(),
            "MSISDN/Number",
            "CustomerID",
        )
        .unwrap();

        assert_eq!(keys.user_ids, vec!["101", "102", "104"]);
        assert_eq!(keys.left_rows, vec![0, 1, 3]);
        assert_eq!(keys.right_rows, vec![3, 1, 0]);
    }

    #[test]
    fn test_join_expands_duplicate_keys() {
        let left = df!("id" => &["a", "a", "b"], "v" => &[1.0, 2.0, 3.0]).unwrap();
        let right = df!("key" => &["a", "b", "a"], "w" => &[1.0, 2.0, 3.0]).unwrap();

        let keys = join_on_key(&left, &right, "id", "key").unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(keys.user_ids, vec!["a", "a", "a", "a", "b"]);
        assert_eq!(keys.left_rows, vec![0, 0, 1, 1, 2]);
        assert_eq!(keys.right_rows, vec![0, 2, 0, 2, 1]);
    }

    #[test]
    fn test_join_with_mismatched_key_types() {
        let left = df!("id" => &[7i64, 8], "v" => &[1.0, 2.0]).unwrap();
        let right = df!("id" => &["8", "7"], "w" => &[1.0, 2.0]).unwrap();

        let keys = join_on_key(&left, &right, "id", "id").unwrap();
        assert_eq!(keys.user_ids, vec!["7", "8"]);
        assert_eq!(keys.right_rows, vec![1, 0]);
    }

    #[test]
    fn test_join_numeric_keys_by_value() {
        let left = df!("id" => &[101i64, 102], "v" => &[1.0, 2.0]).unwrap();
        let right = df!("id" => &[102.0, 101.0], "w" => &[1.0, 2.0]).unwrap();

        let keys = join_on_key(&left, &right, "id", "id").unwrap();
        assert_eq!(keys.user_ids, vec!["101", "102"]);
        assert_eq!(keys.right_rows, vec![1, 0]);
    }

    #[test]
    fn test_missing_key_column() {
        let result = join_on_key(
            &engagement_frame(),
            &experience_frame(),
            "UserId",
            "CustomerID",
        );
        assert!(matches!(result, Err(SatisfactionError::Schema { .. })));
    }

    #[test]
    fn test_merge_gathers_features_by_source_row() {
        let merged = merge_tables(
            &engagement_frame(),
            &experience_frame(),
            &PipelineConfig::default(),
        )
        .unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged.engagement.shape(), &[3, 3]);
        assert_eq!(merged.experience.shape(), &[3, 3]);
        // user 104: engagement row 3, experience row 0
        assert_eq!(merged.engagement.row(2).to_vec(), vec![40.0, 4.0, 400.0]);
        assert_eq!(merged.experience.row(2).to_vec(), vec![4.0, 40.0, 0.4]);
    }

    #[test]
    fn test_merge_rejects_missing_feature_column() {
        let experience = experience_frame().drop("AvgRTT").unwrap();
        let result = merge_tables(&engagement_frame(), &experience, &PipelineConfig::default());

        match result {
            Err(SatisfactionError::Schema { table, message }) => {
                assert_eq!(table, "experience");
                assert!(message.contains("AvgRTT"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_rejects_null_features() {
        let engagement = df!(
            "MSISDN/Number" => &[101i64, 102],
            "SessionDuration" => &[Some(10.0), None],
            "SessionFrequency" => &[1.0, 2.0],
            "TotalTraffic" => &[100.0, 200.0]
        )
        .unwrap();
        let result = merge_tables(&engagement, &experience_frame(), &PipelineConfig::default());
        assert!(matches!(result, Err(SatisfactionError::Schema { .. })));
    }

    #[test]
    fn test_merge_ignores_bad_values_in_unmatched_rows() {
        let engagement = df!(
            "MSISDN/Number" => &[101i64, 102, 999],
            "SessionDuration" => &[Some(10.0), Some(20.0), None],
            "SessionFrequency" => &[1.0, 2.0, 7.0],
            "TotalTraffic" => &[100.0, 200.0, 300.0]
        )
        .unwrap();

        let merged = merge_tables(&engagement, &experience_frame(), &PipelineConfig::default()).unwrap();
        assert_eq!(merged.user_ids, vec!["101", "102"]);
        assert_eq!(merged.engagement.row(1).to_vec(), vec![20.0, 2.0, 200.0]);
    }

    #[test]
    fn test_merge_disjoint_keys_is_empty_input() {
        let experience = df!(
            "CustomerID" => &[1i64, 2],
            "AvgTCP" => &[1.0, 2.0],
            "AvgRTT" => &[1.0, 2.0],
            "AvgThroughput" => &[1.0, 2.0]
        )
        .unwrap();
        let result = merge_tables(&engagement_frame(), &experience, &PipelineConfig::default());
        assert!(matches!(result, Err(SatisfactionError::EmptyInput { .. })));
    }

    #[test]
    fn test_read_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "CustomerID,AvgTCP,AvgRTT,AvgThroughput").unwrap();
        writeln!(file, "1,0.5,30.0,120.0").unwrap();
        writeln!(file, "2,0.0,45.5,80.0").unwrap();

        let df = read_table(file.path()).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 4);

        let features = feature_matrix(&df, &FeatureSet::experience()).unwrap();
        assert_eq!(features.row(1).to_vec(), vec![0.0, 45.5, 80.0]);
    }
}
