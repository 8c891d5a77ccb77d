//! Plotly figure rendering for chart answers

use crate::models::{ChartSeries, ChartType, VisualizationSpec};
use crate::Result;
use serde_json::{json, Map, Value};

/// Build a Plotly figure (`{"data": [...], "layout": {...}}`) from a chart
/// description. Unknown chart types fail with `UnsupportedChartType`.
pub fn render_figure(spec: &VisualizationSpec) -> Result<Value> {
    let kind = spec.chart_kind()?;

    let series: Vec<&Vec<Value>> = match &spec.data.y {
        ChartSeries::Single(values) => vec![values],
        ChartSeries::Multi(values) => values.iter().collect(),
    };

    let traces: Vec<Value> = if kind == ChartType::Pie {
        // a pie only shows the first series
        series
            .first()
            .map(|values| {
                vec![json!({
                    "type": "pie",
                    "labels": spec.data.x,
                    "values": values,
                })]
            })
            .unwrap_or_default()
    } else {
        series
            .iter()
            .enumerate()
            .map(|(i, values)| trace(kind, &spec.data.x, values, series.len(), i))
            .collect()
    };

    let mut layout = Map::new();
    layout.insert("title".to_string(), json!({ "text": spec.title }));
    if kind != ChartType::Pie {
        layout.insert("xaxis".to_string(), json!({ "title": { "text": spec.x_axis } }));
        layout.insert("yaxis".to_string(), json!({ "title": { "text": spec.y_axis } }));
    }
    for (key, value) in &spec.options {
        layout.entry(key.clone()).or_insert_with(|| value.clone());
    }

    Ok(json!({ "data": traces, "layout": layout }))
}

fn trace(kind: ChartType, x: &[Value], y: &[Value], total: usize, position: usize) -> Value {
    let mut trace = match kind {
        ChartType::Bar => json!({ "type": "bar" }),
        ChartType::Line => json!({ "type": "scatter", "mode": "lines" }),
        ChartType::Scatter => json!({ "type": "scatter", "mode": "markers" }),
        ChartType::Area => json!({ "type": "scatter", "mode": "lines", "fill": "tozeroy" }),
        ChartType::Pie => json!({ "type": "pie" }),
    };

    trace["x"] = json!(x);
    trace["y"] = json!(y);
    if total > 1 {
        trace["name"] = json!(format!("Series {}", position + 1));
    }
    trace
}
