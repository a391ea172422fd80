//! A stateful stand-in for the LVM toolchain.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use csi_lvm_volume::{FakeExecutor, Invocation, Output};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeVg {
    pub pv_count: u32,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeLv {
    pub size_bytes: u64,
    pub segment_type: String,
    pub tags: BTreeSet<String>,
    pub filesystem: Option<String>,
    pub active: bool,
}

#[derive(Debug, Default)]
struct State {
    vgs: BTreeMap<String, FakeVg>,
    lvs: BTreeMap<(String, String), FakeLv>,
    /// mount target -> device
    mounts: BTreeMap<PathBuf, PathBuf>,
    failures: HashMap<String, (i32, String)>,
}

/// Simulates `vgs`, `lvs`, `vgcreate`, `lvcreate`, `lvchange`, `lvremove`,
/// `vgscan`, `vgchange`, `blkid`, `mkfs.ext4`, `mount` and `umount`.
///
/// Programs can be made to fail with [`FakeLvm::fail`].
#[derive(Clone, Default)]
pub struct FakeLvm {
    state: Arc<Mutex<State>>,
}

impl FakeLvm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every invocation on `executor` from this fake.
    pub fn install(&self, executor: &FakeExecutor) {
        let fake = self.clone();
        executor.set_handler(move |inv| fake.handle(inv));
    }

    /// A fresh executor backed by this fake.
    pub fn executor(&self) -> Arc<FakeExecutor> {
        let executor = FakeExecutor::new();
        self.install(&executor);
        executor
    }

    pub fn with_volume_group(self, name: &str, pv_count: u32, tags: &[&str]) -> Self {
        self.state.lock().unwrap().vgs.insert(
            name.to_string(),
            FakeVg {
                pv_count,
                tags: tags.iter().map(|t| t.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_logical_volume(self, vg: &str, name: &str, size_bytes: u64, tags: &[&str]) -> Self {
        self.state.lock().unwrap().lvs.insert(
            (vg.to_string(), name.to_string()),
            FakeLv {
                size_bytes,
                segment_type: "linear".to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                filesystem: Some("ext4".to_string()),
                active: false,
            },
        );
        self
    }

    /// Make `program` exit with `code` and `stderr` until cleared.
    pub fn fail(&self, program: &str, code: i32, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(program.to_string(), (code, stderr.to_string()));
    }

    pub fn clear_failure(&self, program: &str) {
        self.state.lock().unwrap().failures.remove(program);
    }

    pub fn volume_group(&self, name: &str) -> Option<FakeVg> {
        self.state.lock().unwrap().vgs.get(name).cloned()
    }

    pub fn logical_volume(&self, vg: &str, name: &str) -> Option<FakeLv> {
        self.state
            .lock()
            .unwrap()
            .lvs
            .get(&(vg.to_string(), name.to_string()))
            .cloned()
    }

    pub fn logical_volume_names(&self, vg: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .lvs
            .keys()
            .filter(|(g, _)| g == vg)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.state.lock().unwrap().mounts.contains_key(target)
    }

    /// Device mounted at `target`.
    pub fn mounted_device(&self, target: &Path) -> Option<PathBuf> {
        self.state.lock().unwrap().mounts.get(target).cloned()
    }

    /// Forget every mount, as after a reboot.
    pub fn reboot(&self) {
        let mut state = self.state.lock().unwrap();
        state.mounts.clear();
        for lv in state.lvs.values_mut() {
            lv.active = false;
        }
    }

    fn handle(&self, inv: &Invocation) -> Output {
        let mut state = self.state.lock().unwrap();
        if let Some((code, stderr)) = state.failures.get(&inv.program) {
            return Output::failure(*code, stderr.clone());
        }
        match inv.program.as_str() {
            "vgs" => state.report_vgs(inv),
            "lvs" => state.report_lvs(inv),
            "vgcreate" => state.vgcreate(inv),
            "lvcreate" => state.lvcreate(inv),
            "lvchange" => state.lvchange(inv),
            "lvremove" => state.lvremove(inv),
            "blkid" => state.blkid(inv),
            "mkfs.ext4" => state.mkfs(inv),
            "mount" => state.mount(inv),
            "umount" => state.umount(inv),
            "vgscan" | "vgchange" => Output::success(),
            other => Output::failure(127, format!("{}: command not found", other)),
        }
    }
}

fn join(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(",")
}

/// Values following every occurrence of `flag`.
fn values_of<'a>(inv: &'a Invocation, flag: &str) -> Vec<&'a str> {
    inv.args
        .windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .collect()
}

fn split_lv_path(path: &str) -> Option<(String, String)> {
    let path = path.trim_start_matches("/dev/");
    let (vg, lv) = path.split_once('/')?;
    Some((vg.to_string(), lv.to_string()))
}

impl State {
    fn report_vgs(&self, inv: &Invocation) -> Output {
        if !inv.has_arg("--reportformat") {
            let mut out = String::from("  VG      #PV #LV\n");
            for (name, vg) in &self.vgs {
                let lvs = self.lvs.keys().filter(|(g, _)| g == name).count();
                out.push_str(&format!("  {}  {}  {}\n", name, vg.pv_count, lvs));
            }
            return Output::stdout(out);
        }
        let rows: Vec<_> = self
            .vgs
            .iter()
            .map(|(name, vg)| {
                json!({
                    "vg_name": name,
                    "pv_count": vg.pv_count.to_string(),
                    "vg_tags": join(&vg.tags),
                })
            })
            .collect();
        Output::stdout(json!({ "report": [{ "vg": rows }] }).to_string())
    }

    fn report_lvs(&self, inv: &Invocation) -> Output {
        if !inv.has_arg("--reportformat") {
            let mut out = String::from("  LV      VG      LSize\n");
            for ((vg, name), lv) in &self.lvs {
                out.push_str(&format!("  {}  {}  {}b\n", name, vg, lv.size_bytes));
            }
            return Output::stdout(out);
        }
        let vg = inv.last_arg().unwrap_or_default();
        if !self.vgs.contains_key(vg) {
            return Output::failure(5, format!("Volume group \"{}\" not found", vg));
        }
        let rows: Vec<_> = self
            .lvs
            .iter()
            .filter(|((g, _), _)| g == vg)
            .map(|((g, name), lv)| {
                json!({
                    "lv_name": name,
                    "vg_name": g,
                    "lv_size": lv.size_bytes.to_string(),
                    "lv_tags": join(&lv.tags),
                    "segtype": lv.segment_type,
                })
            })
            .collect();
        Output::stdout(json!({ "report": [{ "lv": rows }] }).to_string())
    }

    fn vgcreate(&mut self, inv: &Invocation) -> Output {
        let Some(name) = inv.args.iter().find(|a| !a.starts_with('-') && !a.starts_with('/'))
        else {
            return Output::failure(3, "Please provide a volume group name");
        };
        if self.vgs.contains_key(name) {
            return Output::failure(5, format!("A volume group called {} already exists.", name));
        }
        let pv_count = inv.args.iter().filter(|a| a.starts_with('/')).count() as u32;
        let tags = values_of(inv, "--addtag")
            .into_iter()
            .map(str::to_string)
            .collect();
        self.vgs.insert(name.clone(), FakeVg { pv_count, tags });
        Output::stdout(format!("  Volume group \"{}\" successfully created\n", name))
    }

    fn lvcreate(&mut self, inv: &Invocation) -> Output {
        let (Some(name), Some(vg)) = (inv.value_of("-n"), inv.last_arg()) else {
            return Output::failure(3, "missing name or volume group");
        };
        let Some(group) = self.vgs.get(vg) else {
            return Output::failure(5, format!("Volume group \"{}\" not found", vg));
        };
        let key = (vg.to_string(), name.to_string());
        if self.lvs.contains_key(&key) {
            return Output::failure(
                5,
                format!("Logical Volume \"{}\" already exists in volume group \"{}\"", name, vg),
            );
        }
        let size_bytes = inv
            .value_of("-L")
            .and_then(|s| s.trim_end_matches('b').parse().ok())
            .unwrap_or_default();
        let segment_type = inv.value_of("--type").unwrap_or("linear").to_string();
        if segment_type == "striped" {
            let stripes: u32 = inv
                .value_of("--stripes")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            if stripes > group.pv_count {
                return Output::failure(
                    5,
                    format!(
                        "Number of stripes ({}) must not exceed number of physical volumes ({})",
                        stripes, group.pv_count
                    ),
                );
            }
        }
        let tags = values_of(inv, "--addtag")
            .into_iter()
            .map(str::to_string)
            .collect();
        self.lvs.insert(
            key,
            FakeLv {
                size_bytes,
                segment_type,
                tags,
                filesystem: None,
                active: true,
            },
        );
        Output::stdout(format!("  Logical volume \"{}\" created.\n", name))
    }

    fn lvchange(&mut self, inv: &Invocation) -> Output {
        let Some(target) = inv.last_arg() else {
            return Output::failure(3, "missing target");
        };
        if inv.has_arg("-ay") {
            if !self.vgs.contains_key(target) {
                return Output::failure(5, format!("Volume group \"{}\" not found", target));
            }
            for ((vg, _), lv) in self.lvs.iter_mut() {
                if vg == target {
                    lv.active = true;
                }
            }
            return Output::success();
        }
        let Some(key) = split_lv_path(target) else {
            return Output::failure(3, format!("invalid logical volume {}", target));
        };
        let tags: Vec<String> = values_of(inv, "--addtag")
            .into_iter()
            .map(str::to_string)
            .collect();
        match self.lvs.get_mut(&key) {
            Some(lv) => {
                lv.tags.extend(tags);
                Output::success()
            }
            None => Output::failure(5, format!("Failed to find logical volume \"{}\"", target)),
        }
    }

    fn lvremove(&mut self, inv: &Invocation) -> Output {
        let Some(key) = inv.last_arg().and_then(split_lv_path) else {
            return Output::failure(3, "missing logical volume");
        };
        match self.lvs.remove(&key) {
            Some(_) => Output::stdout(format!("  Logical volume \"{}\" successfully removed\n", key.1)),
            None => Output::failure(5, format!("Failed to find logical volume \"{}/{}\"", key.0, key.1)),
        }
    }

    fn blkid(&self, inv: &Invocation) -> Output {
        let fs = inv
            .last_arg()
            .and_then(split_lv_path)
            .and_then(|key| self.lvs.get(&key))
            .and_then(|lv| lv.filesystem.clone());
        match fs {
            Some(fs) => Output::stdout(format!("{}\n", fs)),
            None => Output::failure(2, ""),
        }
    }

    fn mkfs(&mut self, inv: &Invocation) -> Output {
        let Some(key) = inv.last_arg().and_then(split_lv_path) else {
            return Output::failure(1, "missing device");
        };
        match self.lvs.get_mut(&key) {
            Some(lv) => {
                lv.filesystem = Some("ext4".to_string());
                Output::success()
            }
            None => Output::failure(1, format!("The file /dev/{}/{} does not exist", key.0, key.1)),
        }
    }

    fn mount(&mut self, inv: &Invocation) -> Output {
        let n = inv.args.len();
        if n < 2 {
            return Output::failure(1, "mount: bad usage");
        }
        let device = PathBuf::from(&inv.args[n - 2]);
        let target = PathBuf::from(&inv.args[n - 1]);
        if self.mounts.contains_key(&target) {
            return Output::failure(
                32,
                format!(
                    "mount: {}: {} already mounted on {}.",
                    target.display(),
                    device.display(),
                    target.display()
                ),
            );
        }
        let exists = device
            .to_str()
            .and_then(split_lv_path)
            .map(|key| self.lvs.contains_key(&key))
            .unwrap_or(false);
        if !exists {
            return Output::failure(
                32,
                format!("mount: {}: special device {} does not exist.", target.display(), device.display()),
            );
        }
        self.mounts.insert(target, device);
        Output::success()
    }

    fn umount(&mut self, inv: &Invocation) -> Output {
        let Some(target) = inv.last_arg() else {
            return Output::failure(1, "umount: bad usage");
        };
        match self.mounts.remove(Path::new(target)) {
            Some(_) => Output::success(),
            None => Output::failure(32, format!("umount: {}: not mounted.", target)),
        }
    }
}
