//! Resource quantity parsing (`100m`, `1.5`, `512Mi`, `1e3`, `2G`).

use error_stack::Report;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::infrastructure::k8s::KubernetesError;

const BINARY_SUFFIXES: [(&str, i32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, i32); 9] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

fn invalid(value: &str) -> Report<KubernetesError> {
    Report::new(KubernetesError::InvalidQuantity {
        value: value.to_string(),
    })
}

pub fn parse_quantity(value: &str) -> Result<f64, Report<KubernetesError>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(value));
    }

    let (number, multiplier) = if let Some((number, power)) = BINARY_SUFFIXES
        .iter()
        .find_map(|(suffix, power)| trimmed.strip_suffix(suffix).map(|n| (n, *power)))
    {
        (number, 2f64.powi(power))
    } else if let Some((number, exponent)) = DECIMAL_SUFFIXES
        .iter()
        .find_map(|(suffix, exponent)| trimmed.strip_suffix(suffix).map(|n| (n, *exponent)))
    {
        (number, 10f64.powi(exponent.abs()).powi(exponent.signum()))
    } else {
        // plain numbers and exponent notation such as 1e3 or 12E-1
        (trimmed, 1.0)
    };

    let parsed: f64 = number.parse().map_err(|_| invalid(value))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(invalid(value));
    }
    Ok(parsed * multiplier)
}

/// Rounds up, ignoring float noise around whole numbers.
fn ceil_whole(x: f64) -> i64 {
    let nearest = x.round();
    if (x - nearest).abs() <= 1e-9 * nearest.abs().max(1.0) {
        nearest as i64
    } else {
        x.ceil() as i64
    }
}

/// CPU in millicores, rounded up.
pub fn cpu_millis(quantity: &Quantity) -> Result<i64, Report<KubernetesError>> {
    let cores = parse_quantity(&quantity.0)?;
    Ok(ceil_whole(cores * 1000.0))
}

/// Plain integer value (bytes, pod count), rounded up.
pub fn value(quantity: &Quantity) -> Result<i64, Report<KubernetesError>> {
    Ok(ceil_whole(parse_quantity(&quantity.0)?))
}
