use crate::error::Error;
use crate::state::{FlowField, TurbField};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"SLIP";
const FORMAT_VERSION: u32 = 1;
/// Written as a little-endian one; a reader seeing anything else is looking
/// at a byte-swapped file.
const ENDIAN_MARKER: u32 = 1;

/**
 * Solution snapshot: magic header, format version, endian marker, variable
 * counts, cell count, iteration counter and current CFL, then the raw
 * conservative and turbulence doubles per cell. Everything little-endian.
 */
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub nvar: u32,
    pub nturb: u32,
    pub cell_count: u64,
    pub iteration: u64,
    pub cfl: f64,
    pub conservative: Vec<f64>,
    pub turbulence: Vec<f64>,
}

// ============================================================================
impl Snapshot {
    pub fn capture(
        field: &FlowField,
        turb: Option<&TurbField>,
        iteration: usize,
        cfl: f64,
    ) -> Self {
        Self {
            nvar: field.nvar as u32,
            nturb: turb.map(|t| t.nturb as u32).unwrap_or(0),
            cell_count: field.cell_count() as u64,
            iteration: iteration as u64,
            cfl,
            conservative: field.conservative.clone(),
            turbulence: turb.map(|t| t.vars.clone()).unwrap_or_default(),
        }
    }

    /// Push the snapshot back into a live state. Counts must match the
    /// running case.
    pub fn restore(&self, field: &mut FlowField, turb: Option<&mut TurbField>) -> Result<(), Error> {
        if self.cell_count as usize != field.cell_count() || self.nvar as usize != field.nvar {
            return Err(Error::InvalidInput(format!(
                "snapshot shape ({} cells, {} variables) does not match the case ({}, {})",
                self.cell_count,
                self.nvar,
                field.cell_count(),
                field.nvar
            )));
        }
        field.conservative.copy_from_slice(&self.conservative);
        field.push_old();
        if let Some(turb) = turb {
            if self.nturb as usize != turb.nturb {
                return Err(Error::InvalidInput(format!(
                    "snapshot has {} turbulence variables, the case has {}",
                    self.nturb, turb.nturb
                )));
            }
            turb.vars.copy_from_slice(&self.turbulence);
            turb.push_old();
        }
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&ENDIAN_MARKER.to_le_bytes())?;
        writer.write_all(&self.nvar.to_le_bytes())?;
        writer.write_all(&self.nturb.to_le_bytes())?;
        writer.write_all(&self.cell_count.to_le_bytes())?;
        writer.write_all(&self.iteration.to_le_bytes())?;
        writer.write_all(&self.cfl.to_le_bytes())?;
        for value in self.conservative.iter().chain(self.turbulence.iter()) {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut reader = BufReader::new(File::open(path)?);
        let invalid = |what: &str| Error::InvalidInput(format!("snapshot: {}", what));

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(invalid("bad magic header"));
        }
        let version = read_u32(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(invalid(&format!("unsupported format version {}", version)));
        }
        let endian = read_u32(&mut reader)?;
        if endian != ENDIAN_MARKER {
            return Err(invalid("endianness mismatch"));
        }
        let nvar = read_u32(&mut reader)?;
        let nturb = read_u32(&mut reader)?;
        let cell_count = read_u64(&mut reader)?;
        let iteration = read_u64(&mut reader)?;
        let cfl = read_f64(&mut reader)?;
        if nvar == 0 || nvar > 5 || nturb > 2 {
            return Err(invalid("implausible variable counts"));
        }

        let n = cell_count as usize;
        let mut conservative = vec![0.0; n * nvar as usize];
        for value in conservative.iter_mut() {
            *value = read_f64(&mut reader)?;
        }
        let mut turbulence = vec![0.0; n * nturb as usize];
        for value in turbulence.iter_mut() {
            *value = read_f64(&mut reader)?;
        }

        Ok(Self {
            nvar,
            nturb,
            cell_count,
            iteration,
            cfl,
            conservative,
            turbulence,
        })
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, Error> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64, Error> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
