use anyhow::Result;
use rand_distr::{Distribution, StandardNormal};
use rand_xorshift::XorShiftRng;

/// Empirically fitted covariance matrices are only approximately symmetric;
/// entries within this tolerance of their mirror are treated as equal.
const SYMMETRY_TOLERANCE: f64 = 1e-6;

/// Draw one vector from a multivariate normal distribution, by Cholesky
/// factoring the covariance and transforming independent standard-normal
/// draws. Fails if the covariance isn't positive semi-definite within
/// tolerance.
pub fn sample_multivariate_gaussian(
    means: &[f64],
    covariances: &[Vec<f64>],
    rng: &mut XorShiftRng,
) -> Result<Vec<f64>> {
    let n = means.len();
    let lower = cholesky(covariances, n)?;

    let z: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();
    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let mut x = means[i];
        for j in 0..=i {
            x += lower[i][j] * z[j];
        }
        result.push(x);
    }
    Ok(result)
}

fn cholesky(matrix: &[Vec<f64>], n: usize) -> Result<Vec<Vec<f64>>> {
    if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
        bail!("covariance matrix isn't {}x{}", n, n);
    }
    for i in 0..n {
        for j in 0..i {
            if (matrix[i][j] - matrix[j][i]).abs() > SYMMETRY_TOLERANCE {
                bail!(
                    "covariance matrix isn't symmetric: [{}][{}]={}, [{}][{}]={}",
                    i,
                    j,
                    matrix[i][j],
                    j,
                    i,
                    matrix[j][i]
                );
            }
        }
    }

    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i][j];
            for k in 0..j {
                sum -= lower[i][k] * lower[j][k];
            }
            if i == j {
                // Slightly negative diagonals show up from numerical noise in
                // degenerate mixture components; clamp them to zero.
                if sum < -SYMMETRY_TOLERANCE {
                    bail!(
                        "covariance matrix isn't positive semi-definite (pivot {} at row {})",
                        sum,
                        i
                    );
                }
                lower[i][j] = sum.max(0.0).sqrt();
            } else if lower[j][j] == 0.0 {
                lower[i][j] = 0.0;
            } else {
                lower[i][j] = sum / lower[j][j];
            }
        }
    }
    Ok(lower)
}
