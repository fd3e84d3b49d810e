use image::Rgb;

/// Default PCB defect vocabulary with its fixed display colors (RGB).
const PCB_DEFECTS: &[(&str, [u8; 3])] = &[
    ("short_circuit", [255, 0, 0]),
    ("open_circuit", [0, 0, 255]),
    ("missing_component", [255, 255, 0]),
    ("damaged_track", [255, 0, 255]),
    ("wrong_component", [128, 0, 128]),
    ("solder_defect", [255, 165, 0]),
    ("crack", [0, 255, 0]),
    ("scratch", [0, 255, 255]),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefectClass {
    pub id: usize,
    pub label: String,
    pub color: Rgb<u8>,
}

/// Class id to label/color mapping. Ids outside the table are rejected at decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassTable {
    classes: Vec<DefectClass>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::pcb_defaults()
    }
}

impl ClassTable {
    pub fn pcb_defaults() -> Self {
        Self {
            classes: PCB_DEFECTS
                .iter()
                .enumerate()
                .map(|(id, (label, color))| DefectClass {
                    id,
                    label: (*label).to_string(),
                    color: Rgb(*color),
                })
                .collect(),
        }
    }

    /// Custom labels. Known PCB labels keep their colors; others get a
    /// deterministic color derived from the id.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes = labels
            .into_iter()
            .enumerate()
            .map(|(id, label)| {
                let label = label.into();
                let color = PCB_DEFECTS
                    .iter()
                    .find(|(known, _)| *known == label)
                    .map(|(_, color)| Rgb(*color))
                    .unwrap_or_else(|| generated_color(id));
                DefectClass { id, label, color }
            })
            .collect();
        Self { classes }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&DefectClass> {
        self.classes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DefectClass> {
        self.classes.iter()
    }
}

fn generated_color(id: usize) -> Rgb<u8> {
    // Golden-ratio hue walk keeps neighbouring ids visually distinct.
    let hue = (id as f32 * 0.618_034).fract() * 6.0;
    let sector = hue.floor() as u32;
    let f = hue - sector as f32;
    let (hi, lo) = (230.0_f32, 40.0_f32);
    let rise = lo + (hi - lo) * f;
    let fall = hi - (hi - lo) * f;
    let (r, g, b) = match sector {
        0 => (hi, rise, lo),
        1 => (fall, hi, lo),
        2 => (lo, hi, rise),
        3 => (lo, fall, hi),
        4 => (rise, lo, hi),
        _ => (hi, lo, fall),
    };
    Rgb([r as u8, g as u8, b as u8])
}
