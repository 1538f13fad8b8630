/// PLY point clouds in ascii, binary little endian or binary big endian
/// encoding.
///
/// Only the `vertex` element is read. It must be the first element with
/// data, carry scalar `x`, `y` and `z` properties, and have no list
/// properties. Every other vertex property is skipped.
use crate::error::{BuildError, Result};
use crate::point::Point3;
use crate::source::PointSource;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "ascii" => Some(PlyFormat::Ascii),
            "binary_little_endian" => Some(PlyFormat::BinaryLittleEndian),
            "binary_big_endian" => Some(PlyFormat::BinaryBigEndian),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(ScalarType::I8),
            "uchar" | "uint8" => Some(ScalarType::U8),
            "short" | "int16" => Some(ScalarType::I16),
            "ushort" | "uint16" => Some(ScalarType::U16),
            "int" | "int32" => Some(ScalarType::I32),
            "uint" | "uint32" => Some(ScalarType::U32),
            "float" | "float32" => Some(ScalarType::F32),
            "double" | "float64" => Some(ScalarType::F64),
            _ => None,
        }
    }

    fn read<B: ByteOrder, R: Read>(self, reader: &mut R) -> std::io::Result<f64> {
        Ok(match self {
            ScalarType::I8 => reader.read_i8()? as f64,
            ScalarType::U8 => reader.read_u8()? as f64,
            ScalarType::I16 => reader.read_i16::<B>()? as f64,
            ScalarType::U16 => reader.read_u16::<B>()? as f64,
            ScalarType::I32 => reader.read_i32::<B>()? as f64,
            ScalarType::U32 => reader.read_u32::<B>()? as f64,
            ScalarType::F32 => reader.read_f32::<B>()? as f64,
            ScalarType::F64 => reader.read_f64::<B>()?,
        })
    }
}

/// Vertex layout declared by the header.
#[derive(Debug, Clone, PartialEq)]
struct VertexLayout {
    format: PlyFormat,
    count: u64,
    properties: Vec<ScalarType>,
    /// Property index of x, y and z.
    coords: [usize; 3],
}

/// Element currently being declared while the header is parsed.
enum Declaring {
    Nothing,
    Vertex,
    Other,
}

fn parse_header<R: BufRead>(reader: &mut R, path: &Path) -> Result<VertexLayout> {
    let malformed = |reason: String| BuildError::malformed(path, reason);

    let mut line = Vec::new();
    let mut next_line = |reader: &mut R| -> Result<Option<String>> {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).trim().to_string()))
    };

    if next_line(reader)?.as_deref() != Some("ply") {
        return Err(malformed("missing 'ply' magic".to_string()));
    }

    let mut format = None;
    let mut count = None;
    let mut properties = Vec::new();
    let mut coords: [Option<usize>; 3] = [None; 3];
    let mut declaring = Declaring::Nothing;

    loop {
        let Some(line) = next_line(reader)? else {
            return Err(malformed("header has no end_header".to_string()));
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["end_header"] => break,
            ["format", name, _version] => {
                format = Some(
                    PlyFormat::parse(name)
                        .ok_or_else(|| malformed(format!("unknown format '{name}'")))?,
                );
            }
            ["element", "vertex", n] => {
                let n = n
                    .parse::<u64>()
                    .map_err(|_| malformed(format!("bad vertex count '{n}'")))?;
                count = Some(n);
                declaring = Declaring::Vertex;
            }
            ["element", name, n] => {
                if count.is_none() && *n != "0" {
                    return Err(malformed(format!(
                        "element '{name}' precedes the vertices"
                    )));
                }
                declaring = Declaring::Other;
            }
            ["property", "list", ..] => {
                if let Declaring::Vertex = declaring {
                    return Err(malformed("list properties on vertices".to_string()));
                }
            }
            ["property", kind, name] => {
                if let Declaring::Vertex = declaring {
                    let kind = ScalarType::parse(kind)
                        .ok_or_else(|| malformed(format!("unknown property type '{kind}'")))?;
                    let slot = match *name {
                        "x" => Some(0),
                        "y" => Some(1),
                        "z" => Some(2),
                        _ => None,
                    };
                    if let Some(slot) = slot {
                        coords[slot] = Some(properties.len());
                    }
                    properties.push(kind);
                }
            }
            ["comment", ..] | ["obj_info", ..] | [] => {}
            _ => return Err(malformed(format!("unexpected header line '{line}'"))),
        }
    }

    let format = format.ok_or_else(|| malformed("missing format line".to_string()))?;
    let count = count.ok_or_else(|| malformed("no vertex element".to_string()))?;
    let [Some(x), Some(y), Some(z)] = coords else {
        return Err(malformed("vertices lack x, y or z".to_string()));
    };

    Ok(VertexLayout {
        format,
        count,
        properties,
        coords: [x, y, z],
    })
}

/// PLY vertices read through a buffered reader, one vertex at a time.
pub struct PlySource {
    path: PathBuf,
    reader: BufReader<File>,
    layout: VertexLayout,
}

impl PlySource {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let layout = parse_header(&mut reader, path)?;

        log::info!(
            "PLY file {} ({:?}): {} points, {} properties per vertex",
            path.display(),
            layout.format,
            layout.count,
            layout.properties.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            layout,
        })
    }

    pub fn format(&self) -> PlyFormat {
        self.layout.format
    }

    fn read_vertex(&mut self, values: &mut Vec<f64>) -> Result<Point3> {
        values.clear();
        match self.layout.format {
            PlyFormat::Ascii => self.read_ascii(values)?,
            PlyFormat::BinaryLittleEndian => self.read_binary::<LittleEndian>(values)?,
            PlyFormat::BinaryBigEndian => self.read_binary::<BigEndian>(values)?,
        }
        let [x, y, z] = self.layout.coords.map(|index| values[index] as f32);
        Ok(Point3::new(x, y, z))
    }

    fn read_binary<B: ByteOrder>(&mut self, values: &mut Vec<f64>) -> Result<()> {
        for kind in &self.layout.properties {
            values.push(kind.read::<B, _>(&mut self.reader)?);
        }
        Ok(())
    }

    fn read_ascii(&mut self, values: &mut Vec<f64>) -> Result<()> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(BuildError::malformed(&self.path, "vertex data ends early"));
        }
        for token in line.split_whitespace().take(self.layout.properties.len()) {
            let value = token.parse::<f64>().map_err(|_| {
                BuildError::malformed(&self.path, format!("'{token}' is not a number"))
            })?;
            values.push(value);
        }
        if values.len() < self.layout.properties.len() {
            return Err(BuildError::malformed(
                &self.path,
                format!("vertex line '{}' is short", line.trim()),
            ));
        }
        Ok(())
    }
}

impl PointSource for PlySource {
    fn point_count(&self) -> u64 {
        self.layout.count
    }

    fn points(&mut self) -> Box<dyn Iterator<Item = Result<Point3>> + '_> {
        let mut values = Vec::with_capacity(self.layout.properties.len());
        Box::new((0..self.layout.count).map(move |_| self.read_vertex(&mut values)))
    }
}
