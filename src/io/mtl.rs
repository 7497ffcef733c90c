use crate::types::{BoundingBox, EspaError, EspaResult};
use std::path::{Path, PathBuf};

/// Key prefix of the per-band file name fields
pub const BAND_FILE_PREFIX: &str = "FILE_NAME_BAND_";

/// Value of a single MTL field
#[derive(Debug, Clone, PartialEq)]
pub enum MtlValue {
    /// Quoted string, stored without the quotes
    Text(String),
    /// Numeric value, with its original spelling kept for writing back
    Number(f64, String),
    /// Unquoted non-numeric token such as a date or time
    Token(String),
}

impl MtlValue {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return MtlValue::Text(raw[1..raw.len() - 1].to_string());
        }
        match raw.parse::<f64>() {
            Ok(value) => MtlValue::Number(value, raw.to_string()),
            Err(_) => MtlValue::Token(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MtlValue::Text(s) | MtlValue::Token(s) => s,
            MtlValue::Number(_, raw) => raw,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MtlValue::Number(value, _) => Some(*value),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            MtlValue::Text(s) => format!("\"{}\"", s),
            MtlValue::Number(_, raw) => raw.clone(),
            MtlValue::Token(s) => s.clone(),
        }
    }
}

/// Named `GROUP` of fields and nested groups
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MtlGroup {
    pub name: String,
    pub fields: Vec<(String, MtlValue)>,
    pub groups: Vec<MtlGroup>,
}

impl MtlGroup {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn field(&self, key: &str) -> Option<&MtlValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn find(&self, key: &str) -> Option<&MtlValue> {
        self.field(key)
            .or_else(|| self.groups.iter().find_map(|group| group.find(key)))
    }

    fn find_group(&self, name: &str) -> Option<&MtlGroup> {
        if self.name == name {
            return Some(self);
        }
        self.groups.iter().find_map(|group| group.find_group(name))
    }

    fn find_group_mut(&mut self, name: &str) -> Option<&mut MtlGroup> {
        if self.name == name {
            return Some(self);
        }
        self.groups
            .iter_mut()
            .find_map(|group| group.find_group_mut(name))
    }

    fn collect_band_files(&self, out: &mut Vec<(String, String, String)>) {
        for (key, value) in &self.fields {
            if key.starts_with(BAND_FILE_PREFIX) {
                out.push((self.name.clone(), key.clone(), value.as_str().to_string()));
            }
        }
        for group in &self.groups {
            group.collect_band_files(out);
        }
    }

    fn write(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        out.push_str(&format!("{}GROUP = {}\n", indent, self.name));
        for (key, value) in &self.fields {
            out.push_str(&format!("{}  {} = {}\n", indent, key, value.render()));
        }
        for group in &self.groups {
            group.write(depth + 1, out);
        }
        out.push_str(&format!("{}END_GROUP = {}\n", indent, self.name));
    }
}

/// Parsed Landsat MTL metadata file
#[derive(Debug, Clone, PartialEq)]
pub struct MtlDocument {
    pub root: MtlGroup,
}

impl MtlDocument {
    /// Parse MTL text into a group tree
    pub fn parse(text: &str) -> EspaResult<Self> {
        // Sentinel root so that top-level fields have a home
        let mut stack = vec![MtlGroup::new("")];
        // Line each open group starts on
        let mut opened: Vec<usize> = Vec::new();
        let mut ended = false;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();

            if line.is_empty() {
                continue;
            }
            if line == "END" {
                ended = true;
                break;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                EspaError::Metadata(format!("MTL line {}: expected KEY = VALUE, got [{}]", line_no, line))
            })?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "GROUP" => {
                    stack.push(MtlGroup::new(value));
                    opened.push(line_no);
                }
                "END_GROUP" => {
                    if stack.len() < 2 {
                        return Err(EspaError::Metadata(format!(
                            "MTL line {}: END_GROUP = {} without an open group",
                            line_no, value
                        )));
                    }
                    let group = stack.pop().unwrap_or_default();
                    opened.pop();
                    if group.name != value {
                        return Err(EspaError::Metadata(format!(
                            "MTL line {}: END_GROUP = {} closes group {}",
                            line_no, value, group.name
                        )));
                    }
                    if let Some(parent) = stack.last_mut() {
                        parent.groups.push(group);
                    }
                }
                _ => {
                    if let Some(current) = stack.last_mut() {
                        current.fields.push((key.to_string(), MtlValue::parse(value)));
                    }
                }
            }
        }

        if stack.len() != 1 {
            let open = stack.last().map(|g| g.name.clone()).unwrap_or_default();
            let line_no = opened.last().copied().unwrap_or(0);
            return Err(EspaError::Metadata(format!(
                "MTL line {}: GROUP = {} is never closed",
                line_no, open
            )));
        }
        if !ended {
            log::warn!("MTL text has no END marker");
        }

        let root = stack.pop().unwrap_or_default();
        Ok(Self { root })
    }

    /// Read and parse an MTL file
    pub fn from_file<P: AsRef<Path>>(path: P) -> EspaResult<Self> {
        log::debug!("Reading MTL file: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    /// Depth-first lookup of a field anywhere in the document
    pub fn get(&self, key: &str) -> Option<&MtlValue> {
        self.root.find(key)
    }

    /// Lookup of a field directly inside the named group
    pub fn get_in(&self, group: &str, key: &str) -> Option<&MtlValue> {
        self.root.find_group(group).and_then(|g| g.field(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).map(MtlValue::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MtlValue::as_f64)
    }

    /// Replace a field in a group, appending it when absent
    pub fn set(&mut self, group: &str, key: &str, value: MtlValue) -> EspaResult<()> {
        let target = self
            .root
            .find_group_mut(group)
            .ok_or_else(|| EspaError::Metadata(format!("MTL group {} not found", group)))?;

        match target.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => target.fields.push((key.to_string(), value)),
        }
        Ok(())
    }

    /// Every `FILE_NAME_BAND_*` field as `(group, key, file name)`
    pub fn band_file_names(&self) -> Vec<(String, String, String)> {
        let mut found = Vec::new();
        self.root.collect_band_files(&mut found);
        found
    }

    /// Product corner coordinates as a geographic bounding box
    pub fn corner_coordinates(&self) -> EspaResult<BoundingBox> {
        let get = |key: &str| {
            self.get_f64(key)
                .ok_or_else(|| EspaError::Metadata(format!("MTL is missing {}", key)))
        };

        let ul_lon = get("CORNER_UL_LON_PRODUCT")?;
        let ur_lon = get("CORNER_UR_LON_PRODUCT")?;
        let ll_lon = get("CORNER_LL_LON_PRODUCT")?;
        let lr_lon = get("CORNER_LR_LON_PRODUCT")?;
        let lats = [
            get("CORNER_UL_LAT_PRODUCT")?,
            get("CORNER_UR_LAT_PRODUCT")?,
            get("CORNER_LL_LAT_PRODUCT")?,
            get("CORNER_LR_LAT_PRODUCT")?,
        ];

        // Western corners stay positive and eastern corners go negative when
        // the scene spans 180, so min/max of each side still gives the edges
        let min_lon = ul_lon.min(ll_lon);
        let max_lon = ur_lon.max(lr_lon);

        Ok(BoundingBox {
            min_lon,
            max_lon,
            min_lat: lats.iter().cloned().fold(f64::INFINITY, f64::min),
            max_lat: lats.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Write the document back in MTL layout
    pub fn to_mtl_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.root.fields {
            out.push_str(&format!("{} = {}\n", key, value.render()));
        }
        for group in &self.root.groups {
            group.write(0, &mut out);
        }
        out.push_str("END\n");
        out
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> EspaResult<()> {
        std::fs::write(path.as_ref(), self.to_mtl_string())?;
        Ok(())
    }
}

/// Locate the single `*_MTL.txt` file in a directory
pub fn find_mtl_file<P: AsRef<Path>>(dir: P) -> EspaResult<PathBuf> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let is_mtl = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with("_MTL.txt"));
        if is_mtl {
            found.push(path);
        }
    }

    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(EspaError::Metadata(format!(
            "No MTL file found in {}",
            dir.as_ref().display()
        ))),
        n => Err(EspaError::Metadata(format!(
            "Found {} MTL files in {}, expected one",
            n,
            dir.as_ref().display()
        ))),
    }
}
