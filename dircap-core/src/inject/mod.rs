pub mod shellcode;
