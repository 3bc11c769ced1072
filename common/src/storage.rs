use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Lines, Read, Seek, SeekFrom, Take, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{MrError, Result};

/// Rango de bytes de un archivo de entrada. Siempre contiene líneas completas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

/// Lo único que el master necesita del almacenamiento: partir la entrada.
pub trait InputSplitter: Send + Sync {
    /// Devuelve a lo sumo `hint` bloques ordenados. Un archivo vacío da cero bloques.
    fn split(&self, path: &str, hint: u32) -> Result<Vec<FileBlock>>;
}

pub type BlockLines = Lines<BufReader<Take<File>>>;

/// Almacenamiento sobre el filesystem local (o un volumen compartido).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Iterador perezoso sobre las líneas del bloque.
    pub fn open_block_reader(&self, block: &FileBlock) -> Result<BlockLines> {
        let mut file = File::open(&block.path)?;
        file.seek(SeekFrom::Start(block.offset))?;
        Ok(BufReader::new(file.take(block.length)).lines())
    }

    /// Escribe la salida de un reducer en bloques de `chunk_lines` líneas.
    ///
    /// La réplica 0 va directo en `dir`, las demás en `dir/replica-N/`.
    /// Una partición sin líneas deja igual un bloque vacío.
    pub fn write_output(
        &self,
        dir: &Path,
        partition: u32,
        lines: &[String],
        chunk_lines: u32,
        replicas: u32,
    ) -> Result<Vec<PathBuf>> {
        let chunks: Vec<&[String]> = if lines.is_empty() {
            vec![lines]
        } else {
            lines.chunks(chunk_lines.max(1) as usize).collect()
        };

        let mut written = Vec::new();
        for replica in 0..replicas.max(1) {
            let base = if replica == 0 {
                dir.to_path_buf()
            } else {
                dir.join(format!("replica-{replica}"))
            };
            fs::create_dir_all(&base)?;

            for (i, chunk) in chunks.iter().enumerate() {
                let path = base.join(output_chunk_name(partition, i));
                let mut writer = BufWriter::new(File::create(&path)?);
                for line in chunk.iter() {
                    writeln!(writer, "{line}")?;
                }
                writer.flush()?;
                written.push(path);
            }
        }
        Ok(written)
    }
}

pub fn output_chunk_name(partition: u32, chunk: usize) -> String {
    format!("part-{:05}-{:05}", partition, chunk)
}

impl InputSplitter for LocalStorage {
    fn split(&self, path: &str, hint: u32) -> Result<Vec<FileBlock>> {
        let file = File::open(path)
            .map_err(|e| MrError::Input(format!("no se pudo abrir {path}: {e}")))?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Ok(Vec::new());
        }

        let target = size.div_ceil(u64::from(hint.max(1)));
        let mut reader = BufReader::new(file);
        let mut blocks = Vec::new();
        let mut line = Vec::new();
        let mut start = 0u64;
        let mut pos = 0u64;

        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)? as u64;
            if n == 0 {
                break;
            }
            pos += n;
            if pos - start >= target {
                blocks.push(FileBlock {
                    path: path.to_string(),
                    offset: start,
                    length: pos - start,
                });
                start = pos;
            }
        }
        if pos > start {
            blocks.push(FileBlock {
                path: path.to_string(),
                offset: start,
                length: pos - start,
            });
        }
        Ok(blocks)
    }
}
