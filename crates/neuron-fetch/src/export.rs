//! Mesh export to OBJ and PLY files.
//!
//! Files are named `neuron_<segment>_lod<lod>.<ext>` inside the output
//! directory and are overwritten on every run. Mesh contents are written as
//! received; nothing is validated or cleaned up.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use precomputed::MeshBuffer;

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MeshFormat {
    /// Wavefront OBJ.
    Obj,
    /// Stanford PLY.
    Ply,
}

impl MeshFormat {
    /// Every supported format, in export order.
    pub const ALL: [Self; 2] = [Self::Obj, Self::Ply];

    /// File extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Obj => "obj",
            Self::Ply => "ply",
        }
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Body encoding of PLY files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PlyEncoding {
    #[default]
    Binary,
    Ascii,
}

/// Path of the file a `(segment, lod)` pair is exported to.
#[must_use]
pub fn artifact_path(output_dir: &Path, segment: u64, lod: u32, format: MeshFormat) -> PathBuf {
    output_dir.join(format!("neuron_{segment}_lod{lod}.{}", format.extension()))
}

/// Errors from writing mesh files.
#[derive(Debug)]
pub enum ExportError {
    /// The output directory could not be created.
    CreateDir { path: PathBuf, source: io::Error },
    /// A mesh file could not be written.
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDir { path, source } => {
                write!(f, "failed to create {}: {source}", path.display())
            }
            Self::Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } | Self::Write { source, .. } => Some(source),
        }
    }
}

/// Writes meshes into one output directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    output_dir: PathBuf,
    formats: Vec<MeshFormat>,
    ply_encoding: PlyEncoding,
}

impl Exporter {
    /// An exporter writing every format, with binary PLY.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            formats: MeshFormat::ALL.to_vec(),
            ply_encoding: PlyEncoding::default(),
        }
    }

    /// Restrict the written formats. Duplicates are ignored.
    #[must_use]
    pub fn with_formats(mut self, formats: &[MeshFormat]) -> Self {
        self.formats.clear();
        for &format in formats {
            if !self.formats.contains(&format) {
                self.formats.push(format);
            }
        }
        self
    }

    #[must_use]
    pub fn with_ply_encoding(mut self, encoding: PlyEncoding) -> Self {
        self.ply_encoding = encoding;
        self
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn formats(&self) -> &[MeshFormat] {
        &self.formats
    }

    /// Create the output directory and its parents. Succeeds if it exists.
    pub fn prepare(&self) -> Result<(), ExportError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| ExportError::CreateDir {
            path: self.output_dir.clone(),
            source,
        })
    }

    /// Write `mesh` in every configured format and return the written paths.
    ///
    /// Stops at the first file that fails and removes the files already
    /// written for this mesh, so a failed export leaves nothing behind.
    pub fn export(
        &self,
        segment: u64,
        lod: u32,
        mesh: &MeshBuffer,
    ) -> Result<Vec<PathBuf>, ExportError> {
        let comment = format!("neuron {segment} lod {lod}");
        let mut written = Vec::with_capacity(self.formats.len());

        for &format in &self.formats {
            let path = artifact_path(&self.output_dir, segment, lod, format);
            let result = match File::create(&path) {
                Ok(file) => {
                    written.push(path.clone());
                    self.write_file(file, format, mesh, &comment)
                }
                Err(e) => Err(e),
            };
            if let Err(source) = result {
                remove_files(&written);
                return Err(ExportError::Write { path, source });
            }
            tracing::debug!(path = %path.display(), %format, "wrote mesh file");
        }

        Ok(written)
    }

    fn write_file(
        &self,
        file: File,
        format: MeshFormat,
        mesh: &MeshBuffer,
        comment: &str,
    ) -> io::Result<()> {
        let mut writer = BufWriter::new(file);
        match (format, self.ply_encoding) {
            (MeshFormat::Obj, _) => write_obj(mesh, comment, &mut writer)?,
            (MeshFormat::Ply, PlyEncoding::Binary) => write_ply_binary(mesh, comment, &mut writer)?,
            (MeshFormat::Ply, PlyEncoding::Ascii) => write_ply_ascii(mesh, comment, &mut writer)?,
        }
        writer.flush()
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed partial export"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove partial export");
            }
        }
    }
}

fn write_obj<W: Write>(mesh: &MeshBuffer, comment: &str, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "# {comment}")?;
    writeln!(
        writer,
        "# {} vertices, {} faces",
        mesh.vertex_count(),
        mesh.face_count()
    )?;
    for v in &mesh.vertices {
        writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
    }
    // OBJ indices are 1-based.
    for &[a, b, c] in &mesh.faces {
        writeln!(
            writer,
            "f {} {} {}",
            u64::from(a) + 1,
            u64::from(b) + 1,
            u64::from(c) + 1
        )?;
    }
    Ok(())
}

/// PLY stores indices as `int`.
fn ply_index(index: u32) -> io::Result<i32> {
    i32::try_from(index).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("vertex index {index} does not fit a PLY int"),
        )
    })
}

/// Binary little-endian PLY, written directly.
fn write_ply_binary<W: Write>(mesh: &MeshBuffer, comment: &str, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format binary_little_endian 1.0")?;
    writeln!(writer, "comment {comment}")?;
    writeln!(writer, "element vertex {}", mesh.vertex_count())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "element face {}", mesh.face_count())?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "end_header")?;

    for v in &mesh.vertices {
        writer.write_all(&v.x.to_le_bytes())?;
        writer.write_all(&v.y.to_le_bytes())?;
        writer.write_all(&v.z.to_le_bytes())?;
    }
    for face in &mesh.faces {
        writer.write_all(&[3u8])?;
        for &index in face {
            writer.write_all(&ply_index(index)?.to_le_bytes())?;
        }
    }
    Ok(())
}

/// ASCII PLY through `ply-rs`.
fn write_ply_ascii<W: Write>(mesh: &MeshBuffer, comment: &str, writer: &mut W) -> io::Result<()> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push(comment.to_string());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(
            axis.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    vertex_def.count = mesh.vertex_count();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.face_count();
    ply.header.elements.add(face_def);

    let vertices = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(v.x));
            element.insert("y".to_string(), Property::Float(v.y));
            element.insert("z".to_string(), Property::Float(v.z));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let faces = mesh
        .faces
        .iter()
        .map(|face| {
            let indices = face
                .iter()
                .map(|&i| ply_index(i))
                .collect::<io::Result<Vec<_>>>()?;
            let mut element = DefaultElement::new();
            element.insert("vertex_indices".to_string(), Property::ListInt(indices));
            Ok(element)
        })
        .collect::<io::Result<Vec<_>>>()?;
    ply.payload.insert("face".to_string(), faces);

    Writer::new().write_ply(writer, &mut ply)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use ply_rs::parser::Parser;

    fn triangle() -> MeshBuffer {
        MeshBuffer::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.5, 0.0, 0.0),
                Vec3::new(0.0, 2.0, -1.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    fn read_ply(path: &Path) -> Ply<DefaultElement> {
        let mut reader = io::BufReader::new(File::open(path).unwrap());
        Parser::<DefaultElement>::new().read_ply(&mut reader).unwrap()
    }

    #[test]
    fn test_artifact_path() {
        let dir = Path::new("downloaded_neurons");
        assert_eq!(
            artifact_path(dir, 864_691_135_975_539_779, 2, MeshFormat::Obj),
            dir.join("neuron_864691135975539779_lod2.obj")
        );
        assert_eq!(
            artifact_path(dir, 864_691_135_975_539_779, 2, MeshFormat::Ply),
            dir.join("neuron_864691135975539779_lod2.ply")
        );
        // Pure function of its inputs.
        assert_eq!(
            artifact_path(dir, 7, 0, MeshFormat::Ply),
            artifact_path(dir, 7, 0, MeshFormat::Ply)
        );
    }

    #[test]
    fn test_with_formats_dedups() {
        let exporter =
            Exporter::new("out").with_formats(&[MeshFormat::Ply, MeshFormat::Ply, MeshFormat::Obj]);
        assert_eq!(exporter.formats(), &[MeshFormat::Ply, MeshFormat::Obj]);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path().join("a/b/downloaded_neurons"));
        exporter.prepare().unwrap();
        exporter.prepare().unwrap();
        assert!(exporter.output_dir().is_dir());
    }

    #[test]
    fn test_prepare_fails_on_file() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let exporter = Exporter::new(blocker.join("out"));
        assert!(matches!(
            exporter.prepare(),
            Err(ExportError::CreateDir { .. })
        ));
    }

    #[test]
    fn test_export_obj() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path()).with_formats(&[MeshFormat::Obj]);

        let written = exporter.export(42, 1, &triangle()).unwrap();
        assert_eq!(written, vec![temp.path().join("neuron_42_lod1.obj")]);

        let text = fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# neuron 42 lod 1");
        assert_eq!(lines[1], "# 3 vertices, 1 faces");
        assert_eq!(&lines[2..], ["v 0 0 0", "v 1.5 0 0", "v 0 2 -1", "f 1 2 3"]);
    }

    #[test]
    fn test_export_binary_ply() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path()).with_formats(&[MeshFormat::Ply]);

        let written = exporter.export(42, 3, &triangle()).unwrap();
        let bytes = fs::read(&written[0]).unwrap();
        let header_end = bytes
            .windows(11)
            .position(|w| w == b"end_header\n")
            .unwrap()
            + 11;
        let header = std::str::from_utf8(&bytes[..header_end]).unwrap();
        assert!(header.starts_with("ply\nformat binary_little_endian 1.0\n"));
        assert!(header.contains("element vertex 3\n"));
        assert!(header.contains("element face 1\n"));
        // 3 vertices * 12 bytes, 1 face * (1 + 12) bytes.
        assert_eq!(bytes.len() - header_end, 36 + 13);

        let ply = read_ply(&written[0]);
        let vertices = &ply.payload["vertex"];
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1]["x"], Property::Float(1.5));
        assert_eq!(
            ply.payload["face"][0]["vertex_indices"],
            Property::ListInt(vec![0, 1, 2])
        );
    }

    #[test]
    fn test_export_ascii_ply() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path())
            .with_formats(&[MeshFormat::Ply])
            .with_ply_encoding(PlyEncoding::Ascii);

        let written = exporter.export(9, 0, &triangle()).unwrap();
        let text = fs::read_to_string(&written[0]).unwrap();
        assert!(text.starts_with("ply\nformat ascii 1.0\n"));
        assert!(text.contains("comment neuron 9 lod 0"));

        let ply = read_ply(&written[0]);
        assert_eq!(ply.payload["vertex"].len(), 3);
        assert_eq!(ply.payload["vertex"][2]["z"], Property::Float(-1.0));
        assert_eq!(
            ply.payload["face"][0]["vertex_indices"],
            Property::ListInt(vec![0, 1, 2])
        );
    }

    #[test]
    fn test_failed_export_removes_written_files() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path());

        // A directory where the PLY file should go makes that write fail
        // after the OBJ is already on disk.
        let ply = artifact_path(temp.path(), 5, 2, MeshFormat::Ply);
        fs::create_dir(&ply).unwrap();

        let err = exporter.export(5, 2, &triangle()).unwrap_err();
        assert!(matches!(&err, ExportError::Write { path, .. } if *path == ply));
        assert!(!artifact_path(temp.path(), 5, 2, MeshFormat::Obj).exists());
        assert!(ply.is_dir());
    }

    #[test]
    fn test_export_both_formats_overwrites() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path());

        let stale = artifact_path(temp.path(), 5, 2, MeshFormat::Obj);
        fs::write(&stale, "stale contents that are much longer than the new file").unwrap();

        let written = exporter.export(5, 2, &MeshBuffer::default()).unwrap();
        assert_eq!(
            written,
            vec![
                artifact_path(temp.path(), 5, 2, MeshFormat::Obj),
                artifact_path(temp.path(), 5, 2, MeshFormat::Ply),
            ]
        );
        let text = fs::read_to_string(&stale).unwrap();
        assert_eq!(text, "# neuron 5 lod 2\n# 0 vertices, 0 faces\n");
    }

    #[test]
    fn test_export_into_missing_dir_fails() {
        let temp = tempfile::tempdir().unwrap();
        let exporter = Exporter::new(temp.path().join("never_created"));
        assert!(matches!(
            exporter.export(1, 1, &triangle()),
            Err(ExportError::Write { .. })
        ));
    }
}
