use crate::config::LabelsConfig;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Fixed index-to-name table mapping a detection's class id to its label.
#[derive(Debug)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn load(config: &LabelsConfig) -> io::Result<Self> {
        let names = read_label_names(&config.get_path())?;

        if names.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "labels file contains no class names",
            ));
        }

        Ok(Self { names })
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}

fn read_label_names(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut names = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        names.push(name.to_string());
    }

    Ok(names)
}
