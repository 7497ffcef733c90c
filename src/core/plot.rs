//! Order-level statistics summaries.
//!
//! The `.stats` files distributed for every product of an order are grouped
//! by sensor family and band, then written out as a CSV table and an SVG
//! chart of the mean with its min/max envelope.

use crate::core::sensor::{Instrument, Satellite, SensorInfo};
use crate::core::statistics::BandStatistics;
use crate::types::{EspaError, EspaResult};
use chrono::NaiveDate;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SVG_WIDTH: f64 = 800.0;
const SVG_HEIGHT: f64 = 400.0;
const SVG_MARGIN: f64 = 60.0;

/// Length of a Landsat collection product id
const COLLECTION_ID_LEN: usize = 40;

/// One dated statistics entry
#[derive(Debug, Clone, PartialEq)]
pub struct PlotPoint {
    pub date: NaiveDate,
    pub stats: BandStatistics,
}

/// Group key: sensor family slug and band type
pub type PlotKey = (String, String);

/// Sensor family used to group products in plots
pub fn sensor_family(sensor: &SensorInfo) -> (&'static str, &'static str) {
    match (sensor.satellite, sensor.instrument) {
        (Satellite::Terra, _) => ("terra", "Terra MODIS"),
        (Satellite::Aqua, _) => ("aqua", "Aqua MODIS"),
        (_, Instrument::Tm) => ("landsat_tm", "Landsat 4-5 TM"),
        (_, Instrument::Etm) => ("landsat_etm", "Landsat 7 ETM+"),
        _ => ("landsat_oli_tirs", "Landsat 8 OLI/TIRS"),
    }
}

/// Split a `.stats` file stem into its product and band type
pub fn split_stats_name(stem: &str) -> EspaResult<(SensorInfo, String)> {
    let split_at = if stem.len() > COLLECTION_ID_LEN
        && stem.as_bytes()[COLLECTION_ID_LEN] == b'_'
        && SensorInfo::from_product_id(&stem[..COLLECTION_ID_LEN]).is_ok()
    {
        COLLECTION_ID_LEN
    } else {
        stem.find('_').ok_or_else(|| {
            EspaError::Metadata(format!("Statistics file {} has no band suffix", stem))
        })?
    };

    let sensor = SensorInfo::from_product_id(&stem[..split_at])?;
    let band_type = stem[split_at + 1..].to_string();
    if band_type.is_empty() {
        return Err(EspaError::Metadata(format!("Statistics file {} has no band suffix", stem)));
    }
    Ok((sensor, band_type))
}

/// Read every valid `.stats` file in `stats_dir`, grouped and date-sorted
pub fn collect_statistics(stats_dir: &Path) -> EspaResult<BTreeMap<PlotKey, Vec<PlotPoint>>> {
    let mut groups: BTreeMap<PlotKey, Vec<PlotPoint>> = BTreeMap::new();

    for entry in std::fs::read_dir(stats_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("stats") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let (sensor, band_type) = match split_stats_name(stem) {
            Ok(parts) => parts,
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let stats = BandStatistics::from_file(&path)?;
        if !stats.valid {
            log::debug!("Skipping {} without valid pixels", path.display());
            continue;
        }

        let (family, _) = sensor_family(&sensor);
        groups
            .entry((family.to_string(), band_type))
            .or_default()
            .push(PlotPoint {
                date: sensor.acquisition_date,
                stats,
            });
    }

    for points in groups.values_mut() {
        points.sort_by_key(|p| p.date);
    }
    Ok(groups)
}

/// CSV table with one row per acquisition
pub fn to_csv(points: &[PlotPoint]) -> String {
    let mut out = String::from("date,minimum,maximum,mean,stddev\n");
    for point in points {
        out.push_str(&format!(
            "{},{:.6},{:.6},{:.6},{:.6}\n",
            point.date.format("%Y-%m-%d"),
            point.stats.minimum,
            point.stats.maximum,
            point.stats.mean,
            point.stats.stddev
        ));
    }
    out
}

fn xml_error(e: quick_xml::Error) -> EspaError {
    EspaError::XmlParsing(format!("Failed to write SVG: {}", e))
}

fn element<'a>(name: &'a str, attributes: &[(&'a str, &'a str)]) -> BytesStart<'a> {
    BytesStart::new(name).with_attributes(attributes.iter().copied())
}

fn points_attr(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{:.2},{:.2}", x, y))
        .collect::<Vec<_>>()
        .join(" ")
}

/// SVG line chart of the mean with a min/max envelope
pub fn to_svg(title: &str, points: &[PlotPoint]) -> EspaResult<String> {
    if points.is_empty() {
        return Err(EspaError::Processing(format!("No data to plot for {}", title)));
    }

    let first = points[0].date;
    let last = points[points.len() - 1].date;
    let day_span = (last - first).num_days().max(1) as f64;

    let low = points.iter().map(|p| p.stats.minimum).fold(f64::INFINITY, f64::min);
    let high = points.iter().map(|p| p.stats.maximum).fold(f64::NEG_INFINITY, f64::max);
    let value_span = if high > low { high - low } else { 1.0 };

    let plot_width = SVG_WIDTH - 2.0 * SVG_MARGIN;
    let plot_height = SVG_HEIGHT - 2.0 * SVG_MARGIN;
    let x_of = |date: NaiveDate| {
        if points.len() == 1 {
            SVG_MARGIN + plot_width / 2.0
        } else {
            SVG_MARGIN + (date - first).num_days() as f64 / day_span * plot_width
        }
    };
    let y_of = |value: f64| SVG_HEIGHT - SVG_MARGIN - (value - low) / value_span * plot_height;

    let mut envelope: Vec<(f64, f64)> = points.iter().map(|p| (x_of(p.date), y_of(p.stats.maximum))).collect();
    envelope.extend(points.iter().rev().map(|p| (x_of(p.date), y_of(p.stats.minimum))));
    let mean: Vec<(f64, f64)> = points.iter().map(|p| (x_of(p.date), y_of(p.stats.mean))).collect();

    let width = format!("{}", SVG_WIDTH);
    let height = format!("{}", SVG_HEIGHT);
    let left = format!("{}", SVG_MARGIN);
    let right = format!("{}", SVG_WIDTH - SVG_MARGIN);
    let bottom = format!("{}", SVG_HEIGHT - SVG_MARGIN);
    let top = format!("{}", SVG_MARGIN);
    let title_y = format!("{}", SVG_MARGIN / 2.0);
    let label_y = format!("{}", SVG_HEIGHT - SVG_MARGIN / 2.0);
    let envelope_points = points_attr(&envelope);
    let mean_points = points_attr(&mean);

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut write = |event: Event| writer.write_event(event).map_err(xml_error);

    write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write(Event::Start(element(
        "svg",
        &[
            ("xmlns", "http://www.w3.org/2000/svg"),
            ("width", width.as_str()),
            ("height", height.as_str()),
        ],
    )))?;

    write(Event::Start(element("text", &[("x", left.as_str()), ("y", title_y.as_str()), ("font-size", "16")])))?;
    write(Event::Text(BytesText::new(title)))?;
    write(Event::End(BytesEnd::new("text")))?;

    for (x1, y1, x2, y2) in [(&left, &bottom, &right, &bottom), (&left, &top, &left, &bottom)] {
        write(Event::Empty(element(
            "line",
            &[
                ("x1", x1.as_str()),
                ("y1", y1.as_str()),
                ("x2", x2.as_str()),
                ("y2", y2.as_str()),
                ("stroke", "black"),
            ],
        )))?;
    }

    write(Event::Empty(element(
        "polygon",
        &[("points", envelope_points.as_str()), ("fill", "lightsteelblue"), ("stroke", "none")],
    )))?;
    write(Event::Empty(element(
        "polyline",
        &[("points", mean_points.as_str()), ("fill", "none"), ("stroke", "navy"), ("stroke-width", "2")],
    )))?;

    let labels = [
        (left.clone(), label_y.clone(), first.format("%Y-%m-%d").to_string(), "start"),
        (right.clone(), label_y.clone(), last.format("%Y-%m-%d").to_string(), "end"),
        (format!("{}", SVG_MARGIN - 5.0), bottom.clone(), format!("{:.1}", low), "end"),
        (format!("{}", SVG_MARGIN - 5.0), top.clone(), format!("{:.1}", high), "end"),
    ];
    for (x, y, text, anchor) in &labels {
        write(Event::Start(element(
            "text",
            &[("x", x.as_str()), ("y", y.as_str()), ("font-size", "12"), ("text-anchor", *anchor)],
        )))?;
        write(Event::Text(BytesText::new(text)))?;
        write(Event::End(BytesEnd::new("text")))?;
    }

    write(Event::End(BytesEnd::new("svg")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| EspaError::Processing(format!("SVG is not UTF-8: {}", e)))
}

/// Write CSV and SVG summaries for every group in `stats_dir`
///
/// # Returns
/// * Paths of the files written to `output_dir`
pub fn generate_plots(stats_dir: &Path, output_dir: &Path) -> EspaResult<Vec<PathBuf>> {
    let groups = collect_statistics(stats_dir)?;
    if groups.is_empty() {
        return Err(EspaError::Processing(format!(
            "No valid statistics found in {}",
            stats_dir.display()
        )));
    }

    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    for ((family, band_type), points) in &groups {
        log::info!("Plotting {} {} from {} products", family, band_type, points.len());

        let csv_path = output_dir.join(format!("{}_{}_stats.csv", family, band_type));
        std::fs::write(&csv_path, to_csv(points))?;
        written.push(csv_path);

        let title = format!("{} {}", family, band_type);
        let svg_path = output_dir.join(format!("{}_{}_plot.svg", family, band_type));
        std::fs::write(&svg_path, to_svg(&title, points)?)?;
        written.push(svg_path);
    }

    Ok(written)
}
