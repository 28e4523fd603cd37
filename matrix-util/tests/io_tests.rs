use matrix_util::common_io::read_lines_of_types;
use matrix_util::traits::IoOps;
use ndarray::Array2;

fn sample_matrix() -> Array2<f64> {
    Array2::from_shape_fn((7, 5), |(i, j)| (i as f64) * 0.5 - (j as f64) / 3.0)
}

#[test]
fn ndarray_tsv_gz_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("x.tsv.gz");
    let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

    let xx = sample_matrix();
    xx.to_tsv(file)?;
    let yy = Array2::<f64>::from_tsv(file)?;
    approx::assert_abs_diff_eq!(xx, yy, epsilon = 1e-12);
    Ok(())
}

#[test]
fn csv_skips_comments_and_blank_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("x.csv");
    std::fs::write(&file, "# comment\n1,2\n\n% note\n3, 4\n")?;
    let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

    let yy = Array2::<f64>::from_csv(file)?;
    assert_eq!(yy, ndarray::array![[1.0, 2.0], [3.0, 4.0]]);

    let rows = read_lines_of_types::<f64>(file, ",")?;
    assert_eq!(rows, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

    // a header line is not data
    std::fs::write(file, "a,b\n1,2\n")?;
    assert!(Array2::<f64>::from_csv(file).is_err());
    Ok(())
}

#[test]
fn malformed_input_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ragged = dir.path().join("ragged.tsv");
    std::fs::write(&ragged, "1\t2\n3\n")?;
    assert!(Array2::<f64>::from_tsv(ragged.to_str().unwrap_or_default()).is_err());

    let junk = dir.path().join("junk.tsv");
    std::fs::write(&junk, "1\tx\n")?;
    assert!(Array2::<f64>::from_tsv(junk.to_str().unwrap_or_default()).is_err());

    assert!(Array2::<f64>::from_tsv("/nonexistent/file.tsv").is_err());
    Ok(())
}
