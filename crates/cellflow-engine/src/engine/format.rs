use super::Dynamic;
use crate::builtins::CellHandle;

/// Format a Dynamic value for display. Fractional numbers are rounded to
/// two places.
pub fn format_dynamic(value: &Dynamic) -> String {
    render(value, format_number)
}

/// The text a value is stored as. Numbers keep full precision so that
/// anything reading the text back computes on the same value.
pub fn dynamic_to_text(value: &Dynamic) -> String {
    render(value, number_to_text)
}

fn render(value: &Dynamic, number: fn(f64) -> String) -> String {
    if value.is_unit() {
        String::new()
    } else if let Ok(n) = value.as_float() {
        number(n)
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(b) = value.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else if let Some(cell) = value.clone().try_cast::<CellHandle>() {
        cell.text
    } else if let Ok(s) = value.clone().into_string() {
        s
    } else if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        let parts: Vec<String> = items.iter().map(|item| render(item, number)).collect();
        format!("[{}]", parts.join(", "))
    } else {
        format!("{:?}", value)
    }
}

fn number_to_text(n: f64) -> String {
    if n.is_finite() { n.to_string() } else { format_number(n) }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e10 {
        format!("{:.0}", n)
    } else {
        format!("{:.2}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_dynamic_scalars() {
        assert_eq!(format_dynamic(&Dynamic::UNIT), "");
        assert_eq!(format_dynamic(&Dynamic::from(3_i64)), "3");
        assert_eq!(format_dynamic(&Dynamic::from(2.0_f64)), "2");
        assert_eq!(format_dynamic(&Dynamic::from(2.5_f64)), "2.50");
        assert_eq!(format_dynamic(&Dynamic::from(true)), "TRUE");
        assert_eq!(format_dynamic(&Dynamic::from("hi".to_string())), "hi");
    }

    #[test]
    fn test_format_dynamic_array() {
        let arr: rhai::Array = vec![Dynamic::from(1_i64), Dynamic::from("x".to_string())];
        assert_eq!(format_dynamic(&Dynamic::from(arr)), "[1, x]");
    }

    #[test]
    fn test_stored_text_keeps_precision() {
        let third = 1.0_f64 / 3.0;
        let text = dynamic_to_text(&Dynamic::from(third));
        assert_eq!(text.parse::<f64>().unwrap(), third);
        assert_eq!(format_dynamic(&Dynamic::from(third)), "0.33");
        assert_eq!(dynamic_to_text(&Dynamic::from(2.0_f64)), "2");
        assert_eq!(dynamic_to_text(&Dynamic::from(f64::NAN)), "#NAN!");
        let arr: rhai::Array = vec![Dynamic::from(0.125_f64)];
        assert_eq!(dynamic_to_text(&Dynamic::from(arr)), "[0.125]");
    }

    #[test]
    fn test_format_number_special() {
        assert_eq!(format_number(f64::NAN), "#NAN!");
        assert_eq!(format_number(f64::INFINITY), "#INF!");
    }
}
